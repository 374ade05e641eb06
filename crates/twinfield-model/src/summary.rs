//! Per-simulation summary: the observability sink.
//!
//! Collects messages written by the clock and other components,
//! filtered by a verbosity threshold. Ensemble preparation lowers every
//! summary to errors-only so N replicas do not produce N copies of the
//! routine narrative.

use std::any::Any;

use tracing::{error, info, warn};
use twinfield_core::clock::Severity;

use crate::component::{CloneError, Component};

/// Which message severities a summary records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Record everything.
    #[default]
    Information,
    /// Record warnings and errors.
    Warnings,
    /// Record errors only.
    Errors,
}

impl Verbosity {
    /// Whether a message of the given severity passes this threshold.
    pub const fn accepts(self, severity: Severity) -> bool {
        match self {
            Self::Information => true,
            Self::Warnings => matches!(severity, Severity::Warning | Severity::Error),
            Self::Errors => matches!(severity, Severity::Error),
        }
    }
}

/// One recorded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryMessage {
    /// Who wrote the message.
    pub source: String,
    /// The message text.
    pub text: String,
    /// The message severity.
    pub severity: Severity,
}

/// Message sink with a verbosity threshold.
#[derive(Debug, Clone)]
pub struct Summary {
    name: String,
    verbosity: Verbosity,
    messages: Vec<SummaryMessage>,
}

impl Summary {
    /// Create a summary recording everything.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verbosity: Verbosity::Information,
            messages: Vec::new(),
        }
    }

    /// The current verbosity threshold.
    pub const fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Change the verbosity threshold.
    pub const fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    /// Messages recorded so far, in arrival order.
    pub fn messages(&self) -> &[SummaryMessage] {
        &self.messages
    }
}

impl Component for Summary {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_label(&self) -> &'static str {
        "Summary"
    }

    fn clone_component(&self) -> Result<Box<dyn Component>, CloneError> {
        // Copies carry the threshold, not the recorded history.
        Ok(Box::new(Self {
            name: self.name.clone(),
            verbosity: self.verbosity,
            messages: Vec::new(),
        }))
    }

    fn accepts_messages(&self) -> bool {
        true
    }

    fn write_message(&mut self, source: &str, text: &str, severity: Severity) {
        if !self.verbosity.accepts(severity) {
            return;
        }
        match severity {
            Severity::Information => info!(summary = %self.name, source, "{text}"),
            Severity::Warning => warn!(summary = %self.name, source, "{text}"),
            Severity::Error => error!(summary = %self.name, source, "{text}"),
        }
        self.messages.push(SummaryMessage {
            source: source.to_owned(),
            text: text.to_owned(),
            severity,
        });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
