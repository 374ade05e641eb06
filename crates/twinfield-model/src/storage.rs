//! Persistent storage seam.
//!
//! Real storage backends live outside the kernel; this component keeps
//! the seam they plug into. It is deliberately clone-safe: the
//! connection is represented by an `open` flag acquired at `prepare`,
//! so a copy carries configuration only and opens its own "connection"
//! when its replica prepares. Ensemble preparation disables storage
//! rather than removing it, preserving the configuration for later
//! single-run use of the original graph.

use std::any::Any;

use tracing::debug;

use crate::component::{CloneError, Component, ComponentError};

/// Storage sink stub with an enable switch.
#[derive(Debug, Clone)]
pub struct DataStore {
    name: String,
    enabled: bool,
    open: bool,
}

impl DataStore {
    /// Create an enabled, closed data store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            open: false,
        }
    }

    /// Whether the store participates in the run.
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the store. Disabling an already-disabled store
    /// is a no-op.
    pub const fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the store currently holds an open connection.
    pub const fn is_open(&self) -> bool {
        self.open
    }
}

impl Component for DataStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_label(&self) -> &'static str {
        "DataStore"
    }

    fn clone_component(&self) -> Result<Box<dyn Component>, CloneError> {
        // Copies never inherit an open connection.
        let mut copy = self.clone();
        copy.open = false;
        Ok(Box::new(copy))
    }

    fn prepare(&mut self) -> Result<(), ComponentError> {
        if self.enabled {
            self.open = true;
            debug!(store = %self.name, "data store opened");
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), ComponentError> {
        if self.open {
            self.open = false;
            debug!(store = %self.name, "data store closed");
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
