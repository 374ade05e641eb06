//! Configuration loading and typed settings for a Twinfield run.
//!
//! The canonical configuration lives in `twinfield-config.yaml` at the
//! project root. This module defines strongly-typed structs that mirror
//! the YAML structure and provides a loader that reads and validates the
//! file. Every field has a sensible default, so a missing or partial
//! file still yields a runnable configuration.

use std::path::Path;

use chrono::{NaiveDate, Weekday};
use serde::Deserialize;

use crate::clock::CancellationMode;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A week-start day string did not match a known weekday.
    #[error("unknown week start day: {value}")]
    UnknownWeekStart {
        /// The offending value.
        value: String,
    },

    /// A cancellation mode string did not match a known mode.
    #[error("unknown cancellation mode: {value} (expected \"advisory\" or \"enforced\")")]
    UnknownCancellationMode {
        /// The offending value.
        value: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level run settings.
///
/// Mirrors the structure of `twinfield-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationSettings {
    /// Clock settings (dates, week start, cancellation mode).
    #[serde(default)]
    pub clock: ClockConfig,

    /// Ensemble settings (replica count, worker bound).
    #[serde(default)]
    pub ensemble: EnsembleConfig,

    /// Synthetic weather settings.
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationSettings {
    /// Load settings from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yml::from_str(&contents)?)
    }

    /// Parse settings from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }
}

/// Clock configuration.
///
/// Absent dates fall back to the weather span at run time, matching the
/// clock's lazy date resolution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClockConfig {
    /// Explicit simulation start date, if any.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,

    /// Explicit simulation end date, if any.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,

    /// Day treated as the start of a week ("sunday", "monday", ...).
    #[serde(default = "default_week_start")]
    pub week_start: String,

    /// Cancellation handling: "advisory" or "enforced".
    #[serde(default = "default_cancellation")]
    pub cancellation: String,
}

impl ClockConfig {
    /// Parse the configured week-start day.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownWeekStart`] for unrecognized values.
    pub fn week_start_day(&self) -> Result<Weekday, ConfigError> {
        parse_week_start(&self.week_start)
    }

    /// Parse the configured cancellation mode.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownCancellationMode`] for unrecognized
    /// values.
    pub fn cancellation_mode(&self) -> Result<CancellationMode, ConfigError> {
        match self.cancellation.to_lowercase().as_str() {
            "advisory" => Ok(CancellationMode::Advisory),
            "enforced" => Ok(CancellationMode::Enforced),
            other => Err(ConfigError::UnknownCancellationMode {
                value: other.to_owned(),
            }),
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            week_start: default_week_start(),
            cancellation: default_cancellation(),
        }
    }
}

/// Ensemble configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnsembleConfig {
    /// Number of replicas to clone from the template.
    #[serde(default = "default_replicates")]
    pub replicates: usize,

    /// Worker thread bound; 0 means available hardware parallelism.
    #[serde(default)]
    pub max_parallelism: usize,
}

impl EnsembleConfig {
    /// The worker bound as an optional override (`None` = hardware
    /// parallelism).
    pub const fn parallelism(&self) -> Option<usize> {
        if self.max_parallelism == 0 {
            None
        } else {
            Some(self.max_parallelism)
        }
    }
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            replicates: default_replicates(),
            max_parallelism: 0,
        }
    }
}

/// Synthetic weather configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WeatherConfig {
    /// Seed for the deterministic met generator.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// First day of the met record.
    #[serde(default = "default_weather_start")]
    pub start_date: NaiveDate,

    /// Last day of the met record.
    #[serde(default = "default_weather_end")]
    pub end_date: NaiveDate,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            start_date: default_weather_start(),
            end_date: default_weather_end(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Parse a weekday name into a typed [`Weekday`].
///
/// # Errors
///
/// Returns [`ConfigError::UnknownWeekStart`] if the string does not
/// match a known weekday.
pub fn parse_week_start(name: &str) -> Result<Weekday, ConfigError> {
    match name.to_lowercase().as_str() {
        "monday" | "mon" => Ok(Weekday::Mon),
        "tuesday" | "tue" => Ok(Weekday::Tue),
        "wednesday" | "wed" => Ok(Weekday::Wed),
        "thursday" | "thu" => Ok(Weekday::Thu),
        "friday" | "fri" => Ok(Weekday::Fri),
        "saturday" | "sat" => Ok(Weekday::Sat),
        "sunday" | "sun" => Ok(Weekday::Sun),
        other => Err(ConfigError::UnknownWeekStart {
            value: other.to_owned(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_week_start() -> String {
    "sunday".to_owned()
}

fn default_cancellation() -> String {
    "advisory".to_owned()
}

const fn default_replicates() -> usize {
    1
}

const fn default_seed() -> u64 {
    42
}

fn default_weather_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default()
}

fn default_weather_end() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 12, 31).unwrap_or_default()
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = SimulationSettings::default();
        assert_eq!(settings.ensemble.replicates, 1);
        assert_eq!(settings.ensemble.parallelism(), None);
        assert_eq!(settings.weather.seed, 42);
        assert_eq!(settings.clock.week_start_day().unwrap(), Weekday::Sun);
        assert_eq!(
            settings.clock.cancellation_mode().unwrap(),
            CancellationMode::Advisory
        );
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
clock:
  start_date: 2020-01-01
  end_date: 2020-06-30
  week_start: monday
  cancellation: enforced

ensemble:
  replicates: 8
  max_parallelism: 4

weather:
  seed: 7
  start_date: 2019-12-01
  end_date: 2020-07-31

logging:
  level: debug
"#;
        let settings = SimulationSettings::parse(yaml).unwrap();
        assert_eq!(
            settings.clock.start_date,
            NaiveDate::from_ymd_opt(2020, 1, 1)
        );
        assert_eq!(settings.clock.week_start_day().unwrap(), Weekday::Mon);
        assert_eq!(
            settings.clock.cancellation_mode().unwrap(),
            CancellationMode::Enforced
        );
        assert_eq!(settings.ensemble.replicates, 8);
        assert_eq!(settings.ensemble.parallelism(), Some(4));
        assert_eq!(settings.weather.seed, 7);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn parse_minimal_yaml() {
        let settings = SimulationSettings::parse("ensemble:\n  replicates: 3\n").unwrap();
        assert_eq!(settings.ensemble.replicates, 3);
        // Everything else uses defaults.
        assert_eq!(settings.weather.seed, 42);
        assert!(settings.clock.start_date.is_none());
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(SimulationSettings::parse("").is_ok());
    }

    #[test]
    fn unknown_week_start_is_rejected() {
        assert!(matches!(
            parse_week_start("someday"),
            Err(ConfigError::UnknownWeekStart { .. })
        ));
    }

    #[test]
    fn unknown_cancellation_mode_is_rejected() {
        let config = ClockConfig {
            cancellation: "sometimes".to_owned(),
            ..ClockConfig::default()
        };
        assert!(matches!(
            config.cancellation_mode(),
            Err(ConfigError::UnknownCancellationMode { .. })
        ));
    }

    #[test]
    fn week_start_accepts_short_names() {
        assert_eq!(parse_week_start("Mon").unwrap(), Weekday::Mon);
        assert_eq!(parse_week_start("SUNDAY").unwrap(), Weekday::Sun);
    }
}
