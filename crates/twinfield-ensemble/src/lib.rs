//! Ensemble preparation and lock-step replica execution.
//!
//! Turning one model graph into an ensemble has two halves:
//!
//! - [`prepare`] -- rewrite the template so it is safe to clone N ways
//!   (disable storage, remove reports, quiet summaries, swap in the
//!   steppable clock);
//! - [`runner`] -- clone the prepared template on a bounded worker pool
//!   and fan every lifecycle call (`prepare`, `commence`, `step`,
//!   `done`) out to all replicas, joining before returning.
//!
//! [`prepare`]: crate::prepare
//! [`runner`]: crate::runner

pub mod prepare;
pub mod runner;
