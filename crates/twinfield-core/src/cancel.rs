//! Shared cancellation token for an ensemble run.
//!
//! One token is created when an ensemble commences and handed to every
//! replica's clock. Cancellation is a one-way latch: once set it stays
//! set, and every holder observes it. The token is advisory to phase
//! listeners; whether the clock itself refuses to step once cancelled is
//! a clock configuration choice.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cheaply cloneable, thread-safe cancellation latch.
///
/// All clones share the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the token. All holders observe the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
