//! Daily phase pipeline and steppable clock for the Twinfield kernel.
//!
//! This crate owns simulated time: the fixed 30-phase daily pipeline,
//! the broadcast bus that carries each phase to its subscribers, and the
//! clock lifecycle (`commence` / `step` / `done`) that drives a model
//! one day at a time.
//!
//! # Modules
//!
//! - [`phase`] -- Named phases, calendar gates, and the ordered
//!   [`DAILY_PIPELINE`] table.
//! - [`bus`] -- Broadcast channels of named callback handles, one per
//!   phase.
//! - [`cancel`] -- Shared cancellation token for a run.
//! - [`clock`] -- [`SimulationClock`] (steppable), [`BatchClock`]
//!   (run-to-completion), and the [`Clock`] capability interface.
//! - [`config`] -- Typed YAML settings for clock, ensemble, weather, and
//!   logging.
//!
//! [`DAILY_PIPELINE`]: phase::DAILY_PIPELINE
//! [`SimulationClock`]: clock::SimulationClock
//! [`BatchClock`]: clock::BatchClock
//! [`Clock`]: clock::Clock

pub mod bus;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod phase;
