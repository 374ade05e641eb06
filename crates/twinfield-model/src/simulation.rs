//! Simulation root and link wiring.
//!
//! A simulation subtree holds one steppable clock plus the components
//! that subscribe to it. [`ModelNode::prepare_simulation`] resolves all
//! links for the subtree: it rebuilds the clock's phase channels from
//! each component's declared subscriptions, injects the weather date
//! span and the summary message sink, and runs every component's
//! one-time `prepare` hook. Wiring is re-derived from scratch on every
//! call, so re-preparing (for example after cloning) is always safe.
//!
//! Handles registered on the clock capture only [`Weak`] references;
//! a component detached after wiring simply drops off its channels on
//! the next fire.
//!
//! [`Weak`]: std::sync::Weak

use std::any::Any;
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;
use twinfield_core::bus::{BoxError, Dispatch, PhaseHandler};
use twinfield_core::clock::{BatchClock, DateSpanSource, MessageSink, SimulationClock};
use twinfield_core::phase::Phase;

use crate::component::{CloneError, Component, ComponentError};
use crate::tree::{ComponentCell, GraphError, ModelNode};

/// Errors raised by simulation wiring and lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// No steppable clock exists in the subtree.
    #[error("no steppable clock found under {name}")]
    MissingClock {
        /// The subtree that was searched.
        name: String,
    },

    /// A tree operation failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A component lifecycle hook failed.
    #[error("component {component} failed during {operation}: {source}")]
    Hook {
        /// The failing component.
        component: String,
        /// The hook that failed ("prepare" or "cleanup").
        operation: &'static str,
        /// The component's error.
        #[source]
        source: ComponentError,
    },
}

/// Marker component at the root of one simulation subtree.
#[derive(Debug, Clone)]
pub struct Simulation {
    name: String,
}

impl Simulation {
    /// Create a simulation marker.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Component for Simulation {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_label(&self) -> &'static str {
        "Simulation"
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

/// The steppable clock participates in the tree like any other
/// component. Cloning carries configuration (dates, week start,
/// cancellation mode) and resets runtime state: subscriptions and
/// injected sources are re-derived by the next `prepare_simulation`.
impl Component for SimulationClock {
    fn name(&self) -> &str {
        "Clock"
    }

    fn type_label(&self) -> &'static str {
        "SimulationClock"
    }

    fn clone_component(&self) -> Result<Box<dyn Component>, CloneError> {
        let mut clock = Self::with_dates(self.configured_start(), self.configured_end());
        clock.set_week_start(self.week_start());
        clock.set_cancellation_mode(self.cancellation_mode());
        Ok(Box::new(clock))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The legacy run-to-completion clock, cloneable for completeness;
/// ensemble preparation swaps it for a steppable clock before cloning.
impl Component for BatchClock {
    fn name(&self) -> &str {
        "Clock"
    }

    fn type_label(&self) -> &'static str {
        "BatchClock"
    }

    fn clone_component(&self) -> Result<Box<dyn Component>, CloneError> {
        let mut clock = Self::with_dates(self.configured_start(), self.configured_end());
        clock.set_week_start(self.week_start());
        Ok(Box::new(clock))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct SubscriberEntry {
    name: String,
    phases: Vec<Phase>,
    weak: Weak<Mutex<Box<dyn Component>>>,
}

impl ModelNode {
    /// Resolve links for this subtree and run one-time setup.
    ///
    /// Rebuilds the clock's phase channels from every component's
    /// declared subscriptions (registration order is depth-first tree
    /// order), injects the lazy date-span source and the message sink,
    /// and runs each component's `prepare` hook.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::MissingClock`] if the subtree has no
    /// [`SimulationClock`], [`SimulationError::Graph`] for lock
    /// failures, or [`SimulationError::Hook`] if a `prepare` hook fails.
    pub fn prepare_simulation(&mut self) -> Result<(), SimulationError> {
        let clock_handle = self.find_component::<SimulationClock>().ok_or_else(|| {
            SimulationError::MissingClock {
                name: self.name().to_owned(),
            }
        })?;
        let clock_cell = clock_handle.cell();

        let entries = self.collect_subscribers(&clock_cell)?;
        let span_cells: Vec<Weak<Mutex<Box<dyn Component>>>> =
            entries.iter().map(|entry| entry.weak.clone()).collect();
        let sink_cells = span_cells.clone();

        clock_handle.with_mut(|clock| {
            clock.clear_subscriptions();
            for entry in &entries {
                for &phase in &entry.phases {
                    clock.subscribe(
                        phase,
                        entry.name.clone(),
                        subscriber_handle(entry.weak.clone(), entry.name.clone()),
                    );
                }
            }
            clock.set_span_source(span_source(span_cells));
            clock.set_message_sink(message_sink(sink_cells));
        })?;

        self.run_prepare_hooks(&clock_cell)?;
        debug!(simulation = %self.name(), subscribers = entries.len(), "simulation prepared");
        Ok(())
    }

    /// Run every component's `cleanup` hook. All hooks run even if one
    /// fails; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Hook`] for the first failing hook, or
    /// [`SimulationError::Graph`] for lock failures.
    pub fn cleanup_simulation(&mut self) -> Result<(), SimulationError> {
        let clock_cell = self
            .find_component::<SimulationClock>()
            .map(|handle| handle.cell());

        let mut first_failure: Option<SimulationError> = None;
        self.visit(&mut |node| {
            let cell = node.component_cell();
            if let Some(clock) = &clock_cell {
                if Arc::ptr_eq(&cell, clock) {
                    return;
                }
            }
            match cell.lock() {
                Ok(mut guard) => {
                    if let Err(source) = guard.cleanup() {
                        if first_failure.is_none() {
                            first_failure = Some(SimulationError::Hook {
                                component: node.name().to_owned(),
                                operation: "cleanup",
                                source,
                            });
                        }
                    }
                }
                Err(_poisoned) => {
                    if first_failure.is_none() {
                        first_failure = Some(SimulationError::Graph(GraphError::Poisoned {
                            name: node.name().to_owned(),
                        }));
                    }
                }
            }
        });

        match first_failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn collect_subscribers(
        &self,
        clock_cell: &ComponentCell,
    ) -> Result<Vec<SubscriberEntry>, SimulationError> {
        let mut entries = Vec::new();
        let mut poisoned: Option<String> = None;

        self.visit(&mut |node| {
            let cell = node.component_cell();
            if Arc::ptr_eq(&cell, clock_cell) {
                return;
            }
            match cell.lock() {
                Ok(guard) => entries.push(SubscriberEntry {
                    name: node.name().to_owned(),
                    phases: guard.subscriptions().to_vec(),
                    weak: Arc::downgrade(&cell),
                }),
                Err(_err) => poisoned = Some(node.name().to_owned()),
            }
        });

        match poisoned {
            Some(name) => Err(SimulationError::Graph(GraphError::Poisoned { name })),
            None => Ok(entries),
        }
    }

    fn run_prepare_hooks(&self, clock_cell: &ComponentCell) -> Result<(), SimulationError> {
        let mut failure: Option<SimulationError> = None;
        self.visit(&mut |node| {
            if failure.is_some() {
                return;
            }
            let cell = node.component_cell();
            if Arc::ptr_eq(&cell, clock_cell) {
                return;
            }
            match cell.lock() {
                Ok(mut guard) => {
                    if let Err(source) = guard.prepare() {
                        failure = Some(SimulationError::Hook {
                            component: node.name().to_owned(),
                            operation: "prepare",
                            source,
                        });
                    }
                }
                Err(_poisoned) => {
                    failure = Some(SimulationError::Graph(GraphError::Poisoned {
                        name: node.name().to_owned(),
                    }));
                }
            }
        });

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// A phase handler that forwards to a component while it is alive.
fn subscriber_handle(weak: Weak<Mutex<Box<dyn Component>>>, name: String) -> PhaseHandler {
    Box::new(move |phase, ctx| {
        let Some(cell) = weak.upgrade() else {
            return Ok(Dispatch::Unsubscribed);
        };
        let mut guard = cell
            .lock()
            .map_err(|_err| BoxError::from(format!("component {name} lock poisoned")))?;
        guard.handle_phase(phase, ctx)?;
        Ok(Dispatch::Handled)
    })
}

/// Lazy date-span lookup across the wired components: the first
/// component advertising a span wins. Values are read at call time, so
/// a span that changes after wiring is still honored.
fn span_source(cells: Vec<Weak<Mutex<Box<dyn Component>>>>) -> DateSpanSource {
    Box::new(move || {
        for weak in &cells {
            let Some(cell) = weak.upgrade() else { continue };
            let Ok(guard) = cell.lock() else { continue };
            if let Some(span) = guard.date_span() {
                return Some(span);
            }
        }
        None
    })
}

/// Message routing to the first wired component that accepts messages.
fn message_sink(cells: Vec<Weak<Mutex<Box<dyn Component>>>>) -> MessageSink {
    Box::new(move |source, text, severity| {
        for weak in &cells {
            let Some(cell) = weak.upgrade() else { continue };
            let Ok(mut guard) = cell.lock() else { continue };
            if guard.accepts_messages() {
                guard.write_message(source, text, severity);
                return;
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;
    use twinfield_core::cancel::CancelToken;
    use twinfield_core::clock::{Clock as _, Severity};

    use super::*;
    use crate::manager::Manager;
    use crate::report::Report;
    use crate::storage::DataStore;
    use crate::summary::Summary;
    use crate::weather::SyntheticWeather;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn field_simulation(clock: SimulationClock) -> ModelNode {
        let mut sim = ModelNode::new(Box::new(Simulation::new("Field")));
        sim.add_child(ModelNode::new(Box::new(clock)));
        sim.add_child(ModelNode::new(Box::new(SyntheticWeather::new(
            "Met",
            date(2020, 1, 1),
            date(2020, 12, 31),
            7,
        ))));
        sim.add_child(ModelNode::new(Box::new(Summary::new("Summary"))));
        sim.add_child(ModelNode::new(Box::new(DataStore::new("Storage"))));
        sim.add_child(ModelNode::new(Box::new(Report::new(
            "DailyReport",
            &["Wheat.Grain.Wt"],
        ))));
        sim.add_child(ModelNode::new(Box::new(Manager::new("SowingRule", ""))));
        sim
    }

    #[test]
    fn prepare_wires_declared_subscriptions() {
        let clock = SimulationClock::with_dates(Some(date(2020, 1, 1)), Some(date(2020, 1, 3)));
        let mut sim = field_simulation(clock);
        sim.prepare_simulation().unwrap();

        let clock = sim.find_component::<SimulationClock>().unwrap();
        clock
            .with(|c| {
                assert_eq!(c.listener_count(Phase::DoWeather), 1);
                assert_eq!(c.listener_count(Phase::EndOfDay), 1);
                assert_eq!(c.listener_count(Phase::DoManagement), 1);
                assert_eq!(c.listener_count(Phase::DoPhenology), 0);
            })
            .unwrap();
    }

    #[test]
    fn prepare_is_idempotent() {
        let clock = SimulationClock::with_dates(Some(date(2020, 1, 1)), Some(date(2020, 1, 3)));
        let mut sim = field_simulation(clock);
        sim.prepare_simulation().unwrap();
        sim.prepare_simulation().unwrap();

        let clock = sim.find_component::<SimulationClock>().unwrap();
        clock
            .with(|c| assert_eq!(c.listener_count(Phase::DoWeather), 1))
            .unwrap();
    }

    #[test]
    fn full_day_loop_feeds_every_subscriber() {
        let clock = SimulationClock::with_dates(Some(date(2020, 1, 1)), Some(date(2020, 1, 3)));
        let mut sim = field_simulation(clock);
        sim.prepare_simulation().unwrap();

        let clock = sim.find_component::<SimulationClock>().unwrap();
        clock
            .with_mut(|c| c.commence(CancelToken::new()))
            .unwrap()
            .unwrap();
        for _ in 0..3 {
            clock.with_mut(SimulationClock::step).unwrap().unwrap();
        }
        clock.with_mut(SimulationClock::done).unwrap().unwrap();

        let report = sim.find_component::<Report>().unwrap();
        assert_eq!(report.with(|r| r.rows().len()).unwrap(), 3);

        let weather = sim.find_component::<SyntheticWeather>().unwrap();
        assert!(weather.with(|w| w.today_met().is_some()).unwrap());

        let summary = sim.find_component::<Summary>().unwrap();
        let recorded = summary
            .with(|s| {
                s.messages()
                    .iter()
                    .any(|m| m.text == "Simulation terminated normally"
                        && m.severity == Severity::Information)
            })
            .unwrap();
        assert!(recorded);
    }

    #[test]
    fn clock_resolves_dates_from_the_weather_span() {
        // No explicit dates: the wired weather span supplies them.
        let mut sim = field_simulation(SimulationClock::new());
        sim.prepare_simulation().unwrap();

        let clock = sim.find_component::<SimulationClock>().unwrap();
        clock
            .with_mut(|c| c.commence(CancelToken::new()))
            .unwrap()
            .unwrap();
        assert_eq!(
            clock.with(|c| c.today()).unwrap(),
            Some(date(2020, 1, 1))
        );
        assert_eq!(
            clock.with(|c| c.end_date()).unwrap().unwrap(),
            date(2020, 12, 31)
        );
    }

    #[test]
    fn missing_clock_is_an_error() {
        let mut sim = ModelNode::new(Box::new(Simulation::new("Field")));
        sim.add_child(ModelNode::new(Box::new(Summary::new("Summary"))));
        assert!(matches!(
            sim.prepare_simulation(),
            Err(SimulationError::MissingClock { .. })
        ));
    }

    #[test]
    fn prepare_and_cleanup_drive_storage_hooks() {
        let clock = SimulationClock::with_dates(Some(date(2020, 1, 1)), Some(date(2020, 1, 2)));
        let mut sim = field_simulation(clock);
        sim.prepare_simulation().unwrap();

        let store = sim.find_component::<DataStore>().unwrap();
        assert!(store.with(DataStore::is_open).unwrap());

        sim.cleanup_simulation().unwrap();
        assert!(!store.with(DataStore::is_open).unwrap());
    }

    #[test]
    fn detached_subscribers_fall_off_their_channels() {
        let clock = SimulationClock::with_dates(Some(date(2020, 1, 1)), Some(date(2020, 1, 5)));
        let mut sim = field_simulation(clock);
        sim.prepare_simulation().unwrap();

        // Detach the report after wiring; its weak handle goes stale.
        sim.remove_descendants::<Report>();

        let clock = sim.find_component::<SimulationClock>().unwrap();
        clock
            .with_mut(|c| c.commence(CancelToken::new()))
            .unwrap()
            .unwrap();
        clock.with_mut(SimulationClock::step).unwrap().unwrap();

        // The stale handle was pruned instead of failing the day.
        clock
            .with(|c| assert_eq!(c.listener_count(Phase::EndOfDay), 0))
            .unwrap();
    }
}
