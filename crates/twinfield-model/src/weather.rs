//! Deterministic synthetic weather.
//!
//! Stands in for a met file reader: a seeded generator produces the same
//! daily values for the same date on every replica, which keeps ensemble
//! runs reproducible. The component exposes its record's date span so a
//! clock with no explicit dates can resolve them lazily.

use std::any::Any;

use chrono::{Datelike, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use twinfield_core::bus::DayContext;
use twinfield_core::config::WeatherConfig;
use twinfield_core::phase::Phase;

use crate::component::{CloneError, Component, ComponentError};

/// One day of met data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyMet {
    /// Solar radiation (MJ/m^2).
    pub radn: f64,
    /// Maximum air temperature (C).
    pub maxt: f64,
    /// Minimum air temperature (C).
    pub mint: f64,
    /// Rainfall (mm).
    pub rain: f64,
}

/// Seeded synthetic met record over a fixed date span.
#[derive(Debug, Clone)]
pub struct SyntheticWeather {
    name: String,
    start: NaiveDate,
    end: NaiveDate,
    seed: u64,
    today_met: Option<DailyMet>,
}

impl SyntheticWeather {
    /// Create a weather component covering `[start, end]`.
    pub fn new(name: impl Into<String>, start: NaiveDate, end: NaiveDate, seed: u64) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            seed,
            today_met: None,
        }
    }

    /// Create a weather component from settings.
    pub fn from_config(name: impl Into<String>, config: &WeatherConfig) -> Self {
        Self::new(name, config.start_date, config.end_date, config.seed)
    }

    /// First day of the met record.
    pub const fn start_date(&self) -> NaiveDate {
        self.start
    }

    /// Last day of the met record.
    pub const fn end_date(&self) -> NaiveDate {
        self.end
    }

    /// The met values read during the most recent `DoWeather`.
    pub const fn today_met(&self) -> Option<DailyMet> {
        self.today_met
    }

    /// Met values for a given date. Deterministic in `(seed, date)`.
    pub fn met_for(&self, date: NaiveDate) -> DailyMet {
        let year = u64::from(date.year().unsigned_abs());
        let day = u64::from(date.ordinal());
        let mixed = self.seed ^ year.wrapping_shl(17) ^ day.wrapping_shl(1);
        let mut rng = StdRng::seed_from_u64(mixed);

        let maxt = rng.random_range(8.0..32.0);
        let mint = maxt - rng.random_range(4.0..12.0);
        let radn = rng.random_range(4.0..28.0);
        let rain = if rng.random_bool(0.3) {
            rng.random_range(0.1..25.0)
        } else {
            0.0
        };

        DailyMet {
            radn,
            maxt,
            mint,
            rain,
        }
    }
}

impl Component for SyntheticWeather {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_label(&self) -> &'static str {
        "SyntheticWeather"
    }

    fn clone_component(&self) -> Result<Box<dyn Component>, CloneError> {
        Ok(Box::new(self.clone()))
    }

    fn subscriptions(&self) -> &'static [Phase] {
        &[Phase::DoWeather]
    }

    fn handle_phase(&mut self, phase: Phase, ctx: &DayContext) -> Result<(), ComponentError> {
        if phase == Phase::DoWeather {
            if ctx.today < self.start || ctx.today > self.end {
                return Err(ComponentError::process(
                    self.name.clone(),
                    format!("no met data for {}", ctx.today),
                ));
            }
            self.today_met = Some(self.met_for(ctx.today));
        }
        Ok(())
    }

    fn date_span(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.start, self.end))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use twinfield_core::cancel::CancelToken;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn weather() -> SyntheticWeather {
        SyntheticWeather::new("Met", date(2020, 1, 1), date(2020, 12, 31), 42)
    }

    #[test]
    fn met_is_deterministic_per_date() {
        let w = weather();
        let a = w.met_for(date(2020, 5, 17));
        let b = w.met_for(date(2020, 5, 17));
        assert_eq!(a, b);
        let c = w.met_for(date(2020, 5, 18));
        assert_ne!(a, c);
    }

    #[test]
    fn met_values_are_physically_plausible() {
        let w = weather();
        let met = w.met_for(date(2020, 7, 3));
        assert!(met.mint < met.maxt);
        assert!(met.radn > 0.0);
        assert!(met.rain >= 0.0);
    }

    #[test]
    fn do_weather_fills_todays_values() {
        let mut w = weather();
        assert!(w.today_met().is_none());

        let ctx = DayContext {
            today: date(2020, 3, 9),
            cancel: CancelToken::new(),
        };
        w.handle_phase(Phase::DoWeather, &ctx).unwrap();
        assert_eq!(w.today_met(), Some(w.met_for(date(2020, 3, 9))));
    }

    #[test]
    fn out_of_range_day_is_an_error() {
        let mut w = weather();
        let ctx = DayContext {
            today: date(2021, 1, 1),
            cancel: CancelToken::new(),
        };
        assert!(w.handle_phase(Phase::DoWeather, &ctx).is_err());
    }

    #[test]
    fn exposes_its_date_span() {
        let w = weather();
        assert_eq!(
            w.date_span(),
            Some((date(2020, 1, 1), date(2020, 12, 31)))
        );
    }
}
