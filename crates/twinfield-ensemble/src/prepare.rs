//! Template rewriting for ensemble safety.
//!
//! A model graph assembled for a single run is not safe to clone N ways
//! as-is: reports would give N writers one table, storage would open N
//! connections nobody reads, summaries would narrate N times over, and
//! a run-to-completion clock cannot be driven in lock-step. The
//! preparer rewrites the template once, in place:
//!
//! - every data store is **disabled** (never removed -- the
//!   configuration survives for later single-run use of the original
//!   graph);
//! - every report is **removed** (reports refuse cloning by design);
//! - every summary is lowered to **errors only**;
//! - any run-to-completion clock is **replaced** by a steppable clock
//!   carrying the same dates, and manager scripts that referenced the
//!   old clock type are rebound to the clock capability name.
//!
//! Every rewrite is idempotent: preparing an already-prepared graph
//! changes nothing and reports zero changes.

use tracing::info;
use twinfield_core::clock::BatchClock;
use twinfield_model::manager::Manager;
use twinfield_model::report::Report;
use twinfield_model::storage::DataStore;
use twinfield_model::summary::{Summary, Verbosity};
use twinfield_model::tree::{GraphError, ModelNode};

/// Errors raised while rewriting a template.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    /// A tree or component access failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// What one preparation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareReport {
    /// Data stores switched from enabled to disabled.
    pub storages_disabled: usize,
    /// Report nodes detached from the tree.
    pub reports_removed: usize,
    /// Summaries lowered to errors-only.
    pub summaries_quieted: usize,
    /// Run-to-completion clocks replaced by steppable clocks.
    pub clocks_replaced: usize,
    /// Manager scripts rebound to the clock capability name.
    pub scripts_rebound: usize,
}

/// Rewrites one template graph into an ensemble-safe form.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnsemblePreparer;

impl EnsemblePreparer {
    /// Rewrite `template` in place. Safe to call on an already-prepared
    /// graph.
    ///
    /// # Errors
    ///
    /// Returns [`PrepareError`] if a component lock is poisoned.
    pub fn prepare(template: &mut ModelNode) -> Result<PrepareReport, PrepareError> {
        let mut report = PrepareReport::default();

        // Swap the legacy clock first so script rebinding below matches
        // what the graph now contains.
        template.visit_mut(&mut |node| {
            let cell = node.component_cell();
            let steppable = {
                let Ok(guard) = cell.lock() else { return };
                guard
                    .as_any()
                    .downcast_ref::<BatchClock>()
                    .map(BatchClock::to_steppable)
            };
            if let Some(clock) = steppable {
                node.set_component(Box::new(clock));
                report.clocks_replaced = report.clocks_replaced.saturating_add(1);
            }
        });

        for manager in template.find_all_components::<Manager>() {
            if manager.with_mut(|m| m.rebind_type("BatchClock", "Clock"))? {
                report.scripts_rebound = report.scripts_rebound.saturating_add(1);
            }
        }

        for store in template.find_all_components::<DataStore>() {
            let changed = store.with_mut(|s| {
                if s.is_enabled() {
                    s.set_enabled(false);
                    true
                } else {
                    false
                }
            })?;
            if changed {
                report.storages_disabled = report.storages_disabled.saturating_add(1);
            }
        }

        report.reports_removed = template.remove_descendants::<Report>();

        for summary in template.find_all_components::<Summary>() {
            let changed = summary.with_mut(|s| {
                if s.verbosity() == Verbosity::Errors {
                    false
                } else {
                    s.set_verbosity(Verbosity::Errors);
                    true
                }
            })?;
            if changed {
                report.summaries_quieted = report.summaries_quieted.saturating_add(1);
            }
        }

        info!(
            storages_disabled = report.storages_disabled,
            reports_removed = report.reports_removed,
            summaries_quieted = report.summaries_quieted,
            clocks_replaced = report.clocks_replaced,
            scripts_rebound = report.scripts_rebound,
            "template prepared for ensemble use"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;
    use twinfield_core::clock::SimulationClock;
    use twinfield_model::component::Folder;
    use twinfield_model::simulation::Simulation;
    use twinfield_model::weather::SyntheticWeather;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn template() -> ModelNode {
        let mut root = ModelNode::new(Box::new(Folder::new("Simulations")));
        root.add_child(ModelNode::new(Box::new(DataStore::new("Storage"))));

        let mut sim = ModelNode::new(Box::new(Simulation::new("Field")));
        sim.add_child(ModelNode::new(Box::new(BatchClock::with_dates(
            Some(date(2020, 1, 1)),
            Some(date(2020, 1, 4)),
        ))));
        sim.add_child(ModelNode::new(Box::new(SyntheticWeather::new(
            "Met",
            date(2020, 1, 1),
            date(2020, 12, 31),
            11,
        ))));
        sim.add_child(ModelNode::new(Box::new(Summary::new("Summary"))));
        sim.add_child(ModelNode::new(Box::new(Report::new(
            "DailyReport",
            &["Wheat.Grain.Wt"],
        ))));
        sim.add_child(ModelNode::new(Box::new(Manager::new(
            "SowingRule",
            "if [BatchClock].Today == [BatchClock].StartDate { sow() }",
        ))));
        root.add_child(sim);
        root
    }

    #[test]
    fn rewrites_every_offender() {
        let mut tree = template();
        let report = EnsemblePreparer::prepare(&mut tree).unwrap();

        assert_eq!(report.storages_disabled, 1);
        assert_eq!(report.reports_removed, 1);
        assert_eq!(report.summaries_quieted, 1);
        assert_eq!(report.clocks_replaced, 1);
        assert_eq!(report.scripts_rebound, 1);
    }

    #[test]
    fn storage_is_disabled_not_removed() {
        let mut tree = template();
        EnsemblePreparer::prepare(&mut tree).unwrap();

        let store = tree.find_component::<DataStore>().unwrap();
        assert!(!store.with(DataStore::is_enabled).unwrap());
    }

    #[test]
    fn reports_are_removed() {
        let mut tree = template();
        EnsemblePreparer::prepare(&mut tree).unwrap();
        assert!(tree.find_component::<Report>().is_none());
    }

    #[test]
    fn summaries_record_errors_only() {
        let mut tree = template();
        EnsemblePreparer::prepare(&mut tree).unwrap();

        let summary = tree.find_component::<Summary>().unwrap();
        assert_eq!(summary.with(Summary::verbosity).unwrap(), Verbosity::Errors);
    }

    #[test]
    fn batch_clock_is_swapped_with_dates_carried() {
        let mut tree = template();
        EnsemblePreparer::prepare(&mut tree).unwrap();

        assert!(tree.find_component::<BatchClock>().is_none());
        let clock = tree.find_component::<SimulationClock>().unwrap();
        clock
            .with(|c| {
                assert_eq!(c.configured_start(), Some(date(2020, 1, 1)));
                assert_eq!(c.configured_end(), Some(date(2020, 1, 4)));
            })
            .unwrap();
    }

    #[test]
    fn manager_scripts_bind_the_capability_name() {
        let mut tree = template();
        EnsemblePreparer::prepare(&mut tree).unwrap();

        let manager = tree.find_component::<Manager>().unwrap();
        let script = manager.with(|m| m.script().to_owned()).unwrap();
        assert!(!script.contains("BatchClock"));
        assert!(script.contains("[Clock]"));
    }

    #[test]
    fn preparing_twice_changes_nothing() {
        let mut tree = template();
        EnsemblePreparer::prepare(&mut tree).unwrap();
        let second = EnsemblePreparer::prepare(&mut tree).unwrap();
        assert_eq!(second, PrepareReport::default());
    }

    #[test]
    fn prepared_template_clones_cleanly() {
        let mut tree = template();
        // The raw template refuses to clone (the report is in the way).
        assert!(tree.clone_tree().is_err());

        EnsemblePreparer::prepare(&mut tree).unwrap();
        assert!(tree.clone_tree().is_ok());
    }
}
