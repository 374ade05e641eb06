//! Error types for the ensemble driver binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during startup and the day loop.

use twinfield_ensemble::runner::{AggregateError, EnsembleError};

/// Top-level error for the ensemble driver binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: twinfield_core::config::ConfigError,
    },

    /// Ensemble construction or an accessor failed.
    #[error("ensemble error: {source}")]
    Ensemble {
        /// The underlying ensemble error.
        #[from]
        source: EnsembleError,
    },

    /// A fan-out call failed on one or more replicas.
    #[error("run error: {source}")]
    Run {
        /// The aggregate of per-replica failures.
        #[from]
        source: AggregateError,
    },
}
