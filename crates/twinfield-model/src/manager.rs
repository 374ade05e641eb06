//! Management rule holder.
//!
//! Managers carry user-authored rule scripts. Compilation and execution
//! of the scripts is a host concern; the kernel only guarantees the
//! phases management logic runs in, and rewrites type references inside
//! scripts when the clock variant they were written against is swapped
//! out.

use std::any::Any;

use twinfield_core::bus::DayContext;
use twinfield_core::phase::Phase;

use crate::component::{CloneError, Component, ComponentError};

/// Holder for one management rule script.
#[derive(Debug, Clone)]
pub struct Manager {
    name: String,
    script: String,
}

impl Manager {
    /// Create a manager around a script source.
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
        }
    }

    /// The script source.
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Replace every reference to a type name inside the script.
    /// Returns true if anything changed.
    pub fn rebind_type(&mut self, from: &str, to: &str) -> bool {
        if self.script.contains(from) {
            self.script = self.script.replace(from, to);
            true
        } else {
            false
        }
    }
}

impl Component for Manager {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_label(&self) -> &'static str {
        "Manager"
    }

    fn clone_component(&self) -> Result<Box<dyn Component>, CloneError> {
        Ok(Box::new(self.clone()))
    }

    fn subscriptions(&self) -> &'static [Phase] {
        &[Phase::DoManagement, Phase::DoManagementCalculations]
    }

    fn handle_phase(&mut self, _phase: Phase, _ctx: &DayContext) -> Result<(), ComponentError> {
        // Script execution is host-provided; the holder just keeps the
        // management channels alive.
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
