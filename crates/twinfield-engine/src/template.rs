//! Template graph assembly.
//!
//! Builds the single-run model graph the ensemble is cloned from: a
//! root folder holding the data store and one field simulation with a
//! batch clock, synthetic met record, summary, daily report, and a
//! sowing-rule manager. Ensemble preparation rewrites this graph before
//! cloning; the batch clock and the report exist here precisely so that
//! rewriting has something real to do on a freshly assembled graph.

use twinfield_core::clock::BatchClock;
use twinfield_core::config::{ConfigError, SimulationSettings};
use twinfield_model::component::Folder;
use twinfield_model::manager::Manager;
use twinfield_model::report::Report;
use twinfield_model::simulation::Simulation;
use twinfield_model::storage::DataStore;
use twinfield_model::summary::Summary;
use twinfield_model::tree::ModelNode;
use twinfield_model::weather::SyntheticWeather;

const SOWING_RULE: &str = "\
if [BatchClock].Today == [BatchClock].StartDate {\n\
    sow(crop: wheat, depth_mm: 30)\n\
}\n";

/// Build the template graph from run settings.
///
/// # Errors
///
/// Returns [`ConfigError`] if the clock settings contain unknown
/// week-start or cancellation values.
pub fn build_template(settings: &SimulationSettings) -> Result<ModelNode, ConfigError> {
    let mut clock = BatchClock::with_dates(
        settings.clock.start_date,
        settings.clock.end_date,
    );
    clock.set_week_start(settings.clock.week_start_day()?);
    clock.set_cancellation_mode(settings.clock.cancellation_mode()?);

    let mut sim = ModelNode::new(Box::new(Simulation::new("Field")));
    sim.add_child(ModelNode::new(Box::new(clock)));
    sim.add_child(ModelNode::new(Box::new(SyntheticWeather::from_config(
        "Met",
        &settings.weather,
    ))));
    sim.add_child(ModelNode::new(Box::new(Summary::new("Summary"))));
    sim.add_child(ModelNode::new(Box::new(Report::new(
        "DailyReport",
        &["Wheat.Grain.Wt", "Wheat.Leaf.LAI"],
    ))));
    sim.add_child(ModelNode::new(Box::new(Manager::new(
        "SowingRule",
        SOWING_RULE,
    ))));

    let mut root = ModelNode::new(Box::new(Folder::new("Simulations")));
    root.add_child(ModelNode::new(Box::new(DataStore::new("Storage"))));
    root.add_child(sim);
    Ok(root)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_build_a_complete_template() {
        let settings = SimulationSettings::default();
        let template = build_template(&settings).unwrap();

        assert!(template.find_component::<BatchClock>().is_some());
        assert!(template.find_component::<SyntheticWeather>().is_some());
        assert!(template.find_component::<DataStore>().is_some());
        assert!(template.find_component::<Report>().is_some());
        assert!(template.find_component::<Summary>().is_some());
        assert!(template.find_component::<Manager>().is_some());
    }

    #[test]
    fn unknown_week_start_fails_template_build() {
        let settings = SimulationSettings {
            clock: twinfield_core::config::ClockConfig {
                week_start: "someday".to_owned(),
                ..twinfield_core::config::ClockConfig::default()
            },
            ..SimulationSettings::default()
        };
        assert!(build_template(&settings).is_err());
    }
}
