//! Tabular reporting seam.
//!
//! A report captures a row of named variables at the end of each day.
//! It is the canonical example of a component that must NOT survive into
//! an ensemble: N replicas writing one table is not a safe shape, so
//! `clone_component` refuses and ensemble preparation detaches reports
//! before cloning.

use std::any::Any;

use chrono::NaiveDate;
use twinfield_core::bus::DayContext;
use twinfield_core::phase::Phase;

use crate::component::{CloneError, Component, ComponentError};

/// End-of-day tabular capture.
#[derive(Debug)]
pub struct Report {
    name: String,
    variable_names: Vec<String>,
    rows: Vec<NaiveDate>,
}

impl Report {
    /// Create a report capturing the named variables.
    pub fn new(name: impl Into<String>, variables: &[&str]) -> Self {
        Self {
            name: name.into(),
            variable_names: variables.iter().map(|v| (*v).to_owned()).collect(),
            rows: Vec::new(),
        }
    }

    /// The variables this report captures.
    pub fn variable_names(&self) -> &[String] {
        &self.variable_names
    }

    /// The days for which a row has been captured, in capture order.
    pub fn rows(&self) -> &[NaiveDate] {
        &self.rows
    }
}

impl Component for Report {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_label(&self) -> &'static str {
        "Report"
    }

    fn clone_component(&self) -> Result<Box<dyn Component>, CloneError> {
        Err(CloneError::NotCloneable {
            name: self.name.clone(),
            type_label: self.type_label(),
        })
    }

    fn subscriptions(&self) -> &'static [Phase] {
        &[Phase::EndOfDay]
    }

    fn handle_phase(&mut self, phase: Phase, ctx: &DayContext) -> Result<(), ComponentError> {
        if phase == Phase::EndOfDay {
            self.rows.push(ctx.today);
        }
        Ok(())
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

    #[test]
    fn captures_one_row_per_day() {
        let mut report = Report::new("DailyReport", &["Wheat.Grain.Wt", "Leaf.LAI"]);
        for day in 1..=3 {
            let ctx = DayContext {
                today: NaiveDate::from_ymd_opt(2020, 1, day).unwrap(),
                cancel: CancelToken::new(),
            };
            report.handle_phase(Phase::EndOfDay, &ctx).unwrap();
            // Other phases do not produce rows.
            report.handle_phase(Phase::DoUpdate, &ctx).unwrap();
        }
        assert_eq!(report.rows().len(), 3);
        assert_eq!(report.variable_names().len(), 2);
    }

    #[test]
    fn refuses_to_clone() {
        let report = Report::new("DailyReport", &["Wheat.Grain.Wt"]);
        assert!(matches!(
            report.clone_component(),
            Err(CloneError::NotCloneable { .. })
        ));
    }
}
