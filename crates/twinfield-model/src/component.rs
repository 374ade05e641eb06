//! The component capability contract.
//!
//! Everything that lives in a model tree implements [`Component`]. The
//! trait makes the capabilities the kernel relies on explicit:
//!
//! - **Checked cloning** -- [`Component::clone_component`] either
//!   produces a fully independent copy or refuses with
//!   [`CloneError::NotCloneable`]. Replica safety rests on this: a
//!   component holding an unshareable resource (an open writer, a file
//!   handle) refuses, and the ensemble preparer must excise it before
//!   cloning.
//! - **Phase subscriptions** -- a component declares the pipeline phases
//!   it listens to; the wiring pass registers it on exactly those
//!   channels.
//! - **Capability probes** -- `date_span` and `accepts_messages` replace
//!   scope-wide type searches with explicit, typed questions.

use std::any::Any;

use chrono::NaiveDate;
use twinfield_core::bus::DayContext;
use twinfield_core::clock::Severity;
use twinfield_core::phase::Phase;

/// A component refused to be duplicated.
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    /// The component holds state that cannot be safely duplicated
    /// across independent replicas.
    #[error("component {name} ({type_label}) cannot be duplicated across replicas")]
    NotCloneable {
        /// The component's instance name.
        name: String,
        /// The component's type label.
        type_label: &'static str,
    },
}

/// A component failed while handling a phase or lifecycle hook.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    /// The component's own processing failed.
    #[error("{component}: {message}")]
    Process {
        /// The component's instance name.
        component: String,
        /// What went wrong.
        message: String,
    },
}

impl ComponentError {
    /// Build a processing error for the named component.
    pub fn process(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Process {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// A node payload in a model tree.
///
/// Default implementations make the minimal component a few lines: no
/// subscriptions, no-op phases and hooks, no optional capabilities.
pub trait Component: Send {
    /// The component's instance name (unique enough for diagnostics;
    /// uniqueness is not enforced).
    fn name(&self) -> &str;

    /// A short label for the component's type.
    fn type_label(&self) -> &'static str;

    /// Produce a fully independent copy of this component, or refuse.
    ///
    /// Copies carry configuration, not live resources: anything bound to
    /// the outside world (connections, handles) is re-acquired by the
    /// copy's own `prepare`.
    ///
    /// # Errors
    ///
    /// Returns [`CloneError::NotCloneable`] when the component cannot be
    /// duplicated safely.
    fn clone_component(&self) -> Result<Box<dyn Component>, CloneError>;

    /// The pipeline phases this component listens to.
    fn subscriptions(&self) -> &'static [Phase] {
        &[]
    }

    /// Handle one fired phase.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError`] to abort the current day; the error
    /// propagates to whoever stepped the clock.
    fn handle_phase(&mut self, _phase: Phase, _ctx: &DayContext) -> Result<(), ComponentError> {
        Ok(())
    }

    /// One-time setup hook, run during simulation preparation.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError`] to abort preparation.
    fn prepare(&mut self) -> Result<(), ComponentError> {
        Ok(())
    }

    /// One-time teardown hook, run during simulation cleanup.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError`] if teardown fails.
    fn cleanup(&mut self) -> Result<(), ComponentError> {
        Ok(())
    }

    /// The date span this component can supply (weather-like
    /// components), used for lazy clock date resolution.
    fn date_span(&self) -> Option<(NaiveDate, NaiveDate)> {
        None
    }

    /// Whether this component accepts observability messages.
    fn accepts_messages(&self) -> bool {
        false
    }

    /// Receive an observability message. Only called when
    /// [`accepts_messages`](Self::accepts_messages) is true.
    fn write_message(&mut self, _source: &str, _text: &str, _severity: Severity) {}

    /// Upcast for typed lookup.
    fn as_any(&self) -> &dyn Any;

    /// Upcast for typed mutable access.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A plain grouping node with no behavior of its own.
#[derive(Debug, Clone)]
pub struct Folder {
    name: String,
}

impl Folder {
    /// Create a folder with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Component for Folder {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_label(&self) -> &'static str {
        "Folder"
    }

    fn clone_component(&self) -> Result<Box<dyn Component>, CloneError> {
        Ok(Box::new(self.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
