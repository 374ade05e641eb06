//! Ensemble driver binary.
//!
//! Loads the run configuration, assembles the template model graph,
//! clones it into an ensemble, and steps every replica in lock-step
//! from the start date to the end date, logging progress along the way.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `twinfield-config.yaml` (path overridable
//!    as the first argument; missing file falls back to defaults)
//! 2. Initialize structured logging (tracing)
//! 3. Build the template model graph
//! 4. Construct the ensemble (prepare the template, clone N ways)
//! 5. Prepare and commence every replica
//! 6. Step day by day until the end date
//! 7. Finish every replica and report the outcome

mod error;
mod template;

use std::path::Path;

use tracing::info;
use tracing_subscriber::EnvFilter;
use twinfield_core::config::SimulationSettings;
use twinfield_ensemble::runner::EnsembleRunner;

use crate::error::EngineError;

/// Application entry point for the ensemble driver.
///
/// # Errors
///
/// Returns an error if configuration, construction, or any fan-out
/// call fails.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "twinfield-config.yaml".to_owned());
    let settings = load_settings(Path::new(&config_path))?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level)),
        )
        .with_target(true)
        .init();

    info!(config = %config_path, "twinfield-engine starting");
    info!(
        replicates = settings.ensemble.replicates,
        max_parallelism = settings.ensemble.max_parallelism,
        weather_seed = settings.weather.seed,
        "Configuration loaded"
    );

    // 3. Build the template model graph.
    let template = template::build_template(&settings).map_err(EngineError::from)?;
    info!("Template graph assembled");

    // 4. Construct the ensemble.
    let mut ensemble = EnsembleRunner::new(
        template,
        settings.ensemble.replicates,
        settings.ensemble.parallelism(),
    )
    .map_err(EngineError::from)?;
    info!(
        replicas = ensemble.replica_count(),
        workers = ensemble.num_workers(),
        "Ensemble constructed"
    );

    // 5. Prepare and commence.
    ensemble.prepare().map_err(EngineError::from)?;
    ensemble.commence().map_err(EngineError::from)?;
    let end = ensemble.end_date().map_err(EngineError::from)?;
    info!(end = %end, "Ensemble commenced");

    // 6. Step day by day. The loop is caller-driven: the ensemble never
    //    runs ahead on its own.
    let mut days: u64 = 0;
    loop {
        let Some(today) = ensemble.today().map_err(EngineError::from)? else {
            break;
        };
        if today > end {
            break;
        }
        ensemble.step().map_err(EngineError::from)?;
        days = days.saturating_add(1);

        let fraction = ensemble.fraction_complete().map_err(EngineError::from)?;
        info!(day = %today, progress_pct = fraction * 100.0, "Day complete");
    }

    // 7. Finish.
    ensemble.done().map_err(EngineError::from)?;
    info!(days, replicas = ensemble.replica_count(), "Run finished");
    Ok(())
}

/// Load settings from the given path, falling back to defaults when the
/// file does not exist.
fn load_settings(path: &Path) -> Result<SimulationSettings, EngineError> {
    if path.exists() {
        Ok(SimulationSettings::from_file(path)?)
    } else {
        Ok(SimulationSettings::default())
    }
}
