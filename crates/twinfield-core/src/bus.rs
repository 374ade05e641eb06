//! Phase broadcast table: named callback handles per phase.
//!
//! The clock owns one channel per phase -- an ordered list of registered
//! callback handles. Handles are registered by the model layer and
//! typically capture a [`Weak`] reference to their component, so the bus
//! never owns subscriber lifetime: a handle whose target is gone reports
//! [`Dispatch::Unsubscribed`] and is pruned on the next fire.
//!
//! Invocation order within a phase is registration order. A handle error
//! aborts the current fire immediately and surfaces to the caller as a
//! [`SubscriberFault`]; remaining handles for that phase do not run.
//!
//! [`Weak`]: std::sync::Weak

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::cancel::CancelToken;
use crate::phase::Phase;

/// Boxed error type carried out of a failing listener.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What a callback handle reports after being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The listener ran.
    Handled,
    /// The listener no longer exists; prune this handle.
    Unsubscribed,
}

/// Context passed to every listener on every fire.
///
/// The token is shared by the whole run; long-running listeners may
/// observe it and cut their own work short.
#[derive(Debug, Clone)]
pub struct DayContext {
    /// The day being simulated.
    pub today: NaiveDate,
    /// The run's shared cancellation token.
    pub cancel: CancelToken,
}

/// A registered callback handle.
pub type PhaseHandler = Box<dyn FnMut(Phase, &DayContext) -> Result<Dispatch, BoxError> + Send>;

struct Subscriber {
    name: String,
    handler: PhaseHandler,
}

/// A listener failed while handling a phase.
///
/// The remainder of that day's phases is abandoned; no rollback is
/// attempted.
#[derive(Debug, thiserror::Error)]
#[error("listener {listener} failed during {phase}: {source}")]
pub struct SubscriberFault {
    /// The phase that was being fired.
    pub phase: Phase,
    /// The name of the failing listener.
    pub listener: String,
    /// The listener's error.
    #[source]
    pub source: BoxError,
}

/// Ordered broadcast channels, one per phase.
#[derive(Default)]
pub struct PhaseBus {
    channels: BTreeMap<Phase, Vec<Subscriber>>,
}

impl PhaseBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named handle on a phase channel.
    ///
    /// Handles fire in registration order.
    pub fn subscribe(&mut self, phase: Phase, name: impl Into<String>, handler: PhaseHandler) {
        self.channels.entry(phase).or_default().push(Subscriber {
            name: name.into(),
            handler,
        });
    }

    /// Drop every registered handle.
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Number of live handles registered on a phase.
    pub fn listener_count(&self, phase: Phase) -> usize {
        self.channels.get(&phase).map_or(0, Vec::len)
    }

    /// Fire one phase: invoke every handle in order.
    ///
    /// A phase with no handles is a no-op. Handles whose target is gone
    /// are pruned. The first handle error aborts the fire.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriberFault`] for the first failing listener.
    pub fn fire(&mut self, phase: Phase, ctx: &DayContext) -> Result<(), SubscriberFault> {
        let Some(channel) = self.channels.get_mut(&phase) else {
            return Ok(());
        };

        let mut expired: Vec<usize> = Vec::new();
        for (index, subscriber) in channel.iter_mut().enumerate() {
            match (subscriber.handler)(phase, ctx) {
                Ok(Dispatch::Handled) => {}
                Ok(Dispatch::Unsubscribed) => expired.push(index),
                Err(source) => {
                    return Err(SubscriberFault {
                        phase,
                        listener: subscriber.name.clone(),
                        source,
                    });
                }
            }
        }

        for index in expired.into_iter().rev() {
            channel.remove(index);
        }
        Ok(())
    }
}

impl std::fmt::Debug for PhaseBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (phase, channel) in &self.channels {
            let names: Vec<&str> = channel.iter().map(|s| s.name.as_str()).collect();
            map.entry(phase, &names);
        }
        map.finish()
    }
}
