//! Steppable simulation clock driving the daily phase pipeline.
//!
//! The clock is the single source of truth for simulated time. It
//! resolves the effective start and end dates, advances exactly one
//! calendar day per [`SimulationClock::step`], and fires the phases of
//! [`DAILY_PIPELINE`] into its phase bus in fixed order. The caller owns
//! the day loop: the clock never runs to completion on its own.
//!
//! # Design Principles
//!
//! - Date resolution is lazy: explicit dates win, otherwise an injected
//!   date-span source (typically a weather component) is consulted at
//!   every read -- never cached, so sources attached after construction
//!   are honored.
//! - Lifecycle is a strict `NotStarted -> Running -> Done` progression;
//!   out-of-order calls are errors, not silent no-ops.
//! - Cancellation is advisory by default: the token is offered to every
//!   listener, and whether `step` itself refuses to run once cancelled is
//!   an explicit configuration choice ([`CancellationMode`]).

use chrono::{Datelike, NaiveDate, Weekday};
use tracing::{debug, info};

use crate::bus::{DayContext, PhaseBus, PhaseHandler, SubscriberFault};
use crate::cancel::CancelToken;
use crate::phase::{DAILY_PIPELINE, Phase};

/// Severity attached to messages written to the observability sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Routine informational output.
    Information,
    /// Something worth attention that did not stop the run.
    Warning,
    /// A failure.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
        })
    }
}

/// Lifecycle state of a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed, not yet commenced.
    NotStarted,
    /// Commenced; days may be stepped.
    Running,
    /// Finished; no further stepping is valid.
    Done,
}

/// Whether `step` itself honors the cancellation token.
///
/// In `Advisory` mode the stepping loop is caller-driven: the token is
/// offered to listeners but the clock keeps stepping until the caller
/// stops asking. In `Enforced` mode a cancelled token fails the next
/// `step` before any phase fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancellationMode {
    /// The token is visible to listeners only.
    #[default]
    Advisory,
    /// `step` fails fast once the token is cancelled.
    Enforced,
}

/// Lazily consulted provider of a (start, end) date span.
pub type DateSpanSource = Box<dyn Fn() -> Option<(NaiveDate, NaiveDate)> + Send>;

/// Sink for clock-originated messages: `(source, text, severity)`.
pub type MessageSink = Box<dyn FnMut(&str, &str, Severity) + Send>;

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Neither an explicit date nor a date-span source could supply the
    /// requested date.
    #[error("no {what} date configured and no weather span source available")]
    Configuration {
        /// Which date was being resolved ("start" or "end").
        what: &'static str,
    },

    /// A lifecycle operation was invoked out of order.
    #[error("{operation} is not valid while the clock is {state:?}")]
    Lifecycle {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the clock was in.
        state: Lifecycle,
    },

    /// `step` was invoked after the final day had already run.
    #[error("no simulated days remain: today {today} is past the end date {end}")]
    PastEnd {
        /// The clock's current day.
        today: NaiveDate,
        /// The resolved end date.
        end: NaiveDate,
    },

    /// The run was cancelled and the clock is in enforced mode.
    #[error("{operation} refused: the run has been cancelled")]
    Cancelled {
        /// The operation that was refused.
        operation: &'static str,
    },

    /// A phase listener failed; the rest of the day was abandoned.
    #[error(transparent)]
    Subscriber(#[from] SubscriberFault),

    /// Advancing the day would overflow the calendar.
    #[error("calendar overflow advancing past {today}")]
    DateOverflow {
        /// The last representable day reached.
        today: NaiveDate,
    },
}

/// Capability interface shared by the steppable and run-to-completion
/// clock variants. Management scripts and external observers bind
/// against this rather than a concrete clock type.
pub trait Clock {
    /// The current simulated day, if the clock has commenced.
    fn today(&self) -> Option<NaiveDate>;
    /// The resolved start date.
    fn start_date(&self) -> Result<NaiveDate, ClockError>;
    /// The resolved end date.
    fn end_date(&self) -> Result<NaiveDate, ClockError>;
    /// Fraction of the run completed so far, in `[0, 1]`.
    fn fraction_complete(&self) -> Result<f64, ClockError>;
}

/// Steppable clock: advances one day per [`step`](Self::step) call.
pub struct SimulationClock {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: Option<NaiveDate>,
    state: Lifecycle,
    week_start: Weekday,
    cancellation: CancellationMode,
    bus: PhaseBus,
    span_source: Option<DateSpanSource>,
    message_sink: Option<MessageSink>,
    cancel: CancelToken,
}

impl SimulationClock {
    /// Create a clock with no explicit dates; both must then come from an
    /// injected date-span source.
    pub fn new() -> Self {
        Self::with_dates(None, None)
    }

    /// Create a clock with explicit start and/or end dates. A `None`
    /// falls back to the date-span source at read time.
    pub fn with_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            start,
            end,
            today: None,
            state: Lifecycle::NotStarted,
            week_start: Weekday::Sun,
            cancellation: CancellationMode::Advisory,
            bus: PhaseBus::new(),
            span_source: None,
            message_sink: None,
            cancel: CancelToken::new(),
        }
    }

    /// The explicitly configured start date, if any.
    pub const fn configured_start(&self) -> Option<NaiveDate> {
        self.start
    }

    /// The explicitly configured end date, if any.
    pub const fn configured_end(&self) -> Option<NaiveDate> {
        self.end
    }

    /// The day treated as the start of a week for `StartOfWeek` firing.
    pub const fn week_start(&self) -> Weekday {
        self.week_start
    }

    /// Set the week-start day.
    pub const fn set_week_start(&mut self, day: Weekday) {
        self.week_start = day;
    }

    /// How `step` treats a cancelled token.
    pub const fn cancellation_mode(&self) -> CancellationMode {
        self.cancellation
    }

    /// Choose how `step` treats a cancelled token.
    pub const fn set_cancellation_mode(&mut self, mode: CancellationMode) {
        self.cancellation = mode;
    }

    /// Current lifecycle state.
    pub const fn lifecycle(&self) -> Lifecycle {
        self.state
    }

    /// Inject the lazy date-span source consulted when no explicit date
    /// is configured.
    pub fn set_span_source(&mut self, source: DateSpanSource) {
        self.span_source = Some(source);
    }

    /// Remove the date-span source.
    pub fn clear_span_source(&mut self) {
        self.span_source = None;
    }

    /// Attach the observability sink that receives the end-of-run
    /// notification.
    pub fn set_message_sink(&mut self, sink: MessageSink) {
        self.message_sink = Some(sink);
    }

    /// Register a named callback handle on a phase channel.
    pub fn subscribe(&mut self, phase: Phase, name: impl Into<String>, handler: PhaseHandler) {
        self.bus.subscribe(phase, name, handler);
    }

    /// Drop every registered handle (wiring is rebuilt at prepare time).
    pub fn clear_subscriptions(&mut self) {
        self.bus.clear();
    }

    /// Number of live handles on a phase channel.
    pub fn listener_count(&self, phase: Phase) -> usize {
        self.bus.listener_count(phase)
    }

    fn span(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.span_source.as_ref().and_then(|source| source())
    }

    /// Commence the run: transition to `Running`, set `today` to the
    /// start date, and fire the one-time setup signals `Commencing`,
    /// `DoCommence`, `StartOfSimulation`, `FinalInitialise` in order,
    /// all carrying the given token.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::Lifecycle`] if the clock has already
    /// commenced, [`ClockError::Configuration`] if no start date is
    /// resolvable, or [`ClockError::Subscriber`] if a setup listener
    /// fails.
    pub fn commence(&mut self, cancel: CancelToken) -> Result<(), ClockError> {
        if self.state != Lifecycle::NotStarted {
            return Err(ClockError::Lifecycle {
                operation: "commence",
                state: self.state,
            });
        }

        let start = self.start_date()?;
        self.cancel = cancel;
        self.today = Some(start);

        let ctx = DayContext {
            today: start,
            cancel: self.cancel.clone(),
        };
        self.bus.fire(Phase::Commencing, &ctx)?;
        self.bus.fire(Phase::DoCommence, &ctx)?;
        self.bus.fire(Phase::StartOfSimulation, &ctx)?;
        self.bus.fire(Phase::FinalInitialise, &ctx)?;

        self.state = Lifecycle::Running;
        info!(start = %start, "clock commenced");
        Ok(())
    }

    /// Run one simulated day: fire every pipeline phase in table order
    /// (calendar-gated phases only when their predicate holds for the
    /// current day), then advance `today` by exactly one day.
    ///
    /// Returns the new `today`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::Lifecycle`] if the clock is not running,
    /// [`ClockError::PastEnd`] if the final day has already run,
    /// [`ClockError::Cancelled`] in enforced mode once the token is
    /// cancelled, or [`ClockError::Subscriber`] if a listener fails --
    /// in which case the remaining phases are skipped and the day does
    /// not advance.
    pub fn step(&mut self) -> Result<NaiveDate, ClockError> {
        if self.state != Lifecycle::Running {
            return Err(ClockError::Lifecycle {
                operation: "step",
                state: self.state,
            });
        }
        let Some(today) = self.today else {
            return Err(ClockError::Lifecycle {
                operation: "step",
                state: self.state,
            });
        };
        let end = self.end_date()?;
        if today > end {
            return Err(ClockError::PastEnd { today, end });
        }
        if self.cancellation == CancellationMode::Enforced && self.cancel.is_cancelled() {
            return Err(ClockError::Cancelled { operation: "step" });
        }

        let week_start = self.week_start;
        let ctx = DayContext {
            today,
            cancel: self.cancel.clone(),
        };
        for entry in &DAILY_PIPELINE {
            if entry.gate.holds(today, week_start) {
                self.bus.fire(entry.phase, &ctx)?;
            }
        }

        let next = today
            .succ_opt()
            .ok_or(ClockError::DateOverflow { today })?;
        self.today = Some(next);
        debug!(day = %today, "day complete");
        Ok(next)
    }

    /// Finish the run: set `today` to the end date, fire
    /// `EndOfSimulation`, notify the observability sink, and transition
    /// to `Done`. Stepping after this is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::Lifecycle`] if the clock is not running,
    /// [`ClockError::Configuration`] if no end date is resolvable, or
    /// [`ClockError::Subscriber`] if a termination listener fails.
    pub fn done(&mut self) -> Result<(), ClockError> {
        if self.state != Lifecycle::Running {
            return Err(ClockError::Lifecycle {
                operation: "done",
                state: self.state,
            });
        }

        let end = self.end_date()?;
        self.today = Some(end);

        let ctx = DayContext {
            today: end,
            cancel: self.cancel.clone(),
        };
        self.bus.fire(Phase::EndOfSimulation, &ctx)?;

        if let Some(sink) = self.message_sink.as_mut() {
            sink("Clock", "Simulation terminated normally", Severity::Information);
        }

        self.state = Lifecycle::Done;
        info!(end = %end, "clock finished");
        Ok(())
    }

    /// True when `today` is the first day of a month.
    pub fn is_start_month(&self) -> bool {
        self.today.is_some_and(|d| d.day() == 1)
    }

    /// True when `today` is the first day of a year.
    pub fn is_start_year(&self) -> bool {
        self.today.is_some_and(|d| d.ordinal() == 1)
    }

    /// True when `today` is the last day of a month.
    pub fn is_end_month(&self) -> bool {
        self.today
            .and_then(|d| d.succ_opt())
            .is_some_and(|d| d.day() == 1)
    }

    /// True when `today` is the last day of a year.
    pub fn is_end_year(&self) -> bool {
        self.today
            .and_then(|d| d.succ_opt())
            .is_some_and(|d| d.ordinal() == 1)
    }
}

impl Default for SimulationClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimulationClock {
    fn today(&self) -> Option<NaiveDate> {
        self.today
    }

    fn start_date(&self) -> Result<NaiveDate, ClockError> {
        if let Some(start) = self.start {
            return Ok(start);
        }
        self.span()
            .map(|(start, _end)| start)
            .ok_or(ClockError::Configuration { what: "start" })
    }

    fn end_date(&self) -> Result<NaiveDate, ClockError> {
        if let Some(end) = self.end {
            return Ok(end);
        }
        self.span()
            .map(|(_start, end)| end)
            .ok_or(ClockError::Configuration { what: "end" })
    }

    /// Zero until the clock commences. Elapsed whole days over total
    /// whole days afterwards, clamped to `[0, 1]`; a zero-length span
    /// (single-day run) reports 1.0 immediately.
    #[allow(clippy::cast_precision_loss)] // day spans are far below 2^52
    fn fraction_complete(&self) -> Result<f64, ClockError> {
        let Some(today) = self.today else {
            return Ok(0.0);
        };
        let start = self.start_date()?;
        let end = self.end_date()?;

        let full_days = end.signed_duration_since(start).num_days();
        if full_days <= 0 {
            return Ok(1.0);
        }
        let elapsed_days = today.signed_duration_since(start).num_days();
        Ok((elapsed_days as f64 / full_days as f64).clamp(0.0, 1.0))
    }
}

impl std::fmt::Debug for SimulationClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationClock")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("today", &self.today)
            .field("state", &self.state)
            .field("week_start", &self.week_start)
            .field("cancellation", &self.cancellation)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

/// Run-to-completion clock retained for templates built around the
/// historical batch style: [`run`](Self::run) owns the whole day loop
/// internally, polling the cancellation token once per day. Ensemble
/// preparation replaces it with a [`SimulationClock`] carrying the same
/// dates so the caller can step day by day instead.
pub struct BatchClock {
    inner: SimulationClock,
}

impl BatchClock {
    /// Create a batch clock with explicit start and/or end dates.
    pub fn with_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            inner: SimulationClock::with_dates(start, end),
        }
    }

    /// The explicitly configured start date, if any.
    pub const fn configured_start(&self) -> Option<NaiveDate> {
        self.inner.configured_start()
    }

    /// The explicitly configured end date, if any.
    pub const fn configured_end(&self) -> Option<NaiveDate> {
        self.inner.configured_end()
    }

    /// The week-start day.
    pub const fn week_start(&self) -> Weekday {
        self.inner.week_start()
    }

    /// Set the week-start day.
    pub const fn set_week_start(&mut self, day: Weekday) {
        self.inner.set_week_start(day);
    }

    /// How the clock treats a cancelled token.
    pub const fn cancellation_mode(&self) -> CancellationMode {
        self.inner.cancellation_mode()
    }

    /// Choose how the clock treats a cancelled token.
    pub const fn set_cancellation_mode(&mut self, mode: CancellationMode) {
        self.inner.set_cancellation_mode(mode);
    }

    /// Inject the lazy date-span source.
    pub fn set_span_source(&mut self, source: DateSpanSource) {
        self.inner.set_span_source(source);
    }

    /// Register a named callback handle on a phase channel.
    pub fn subscribe(&mut self, phase: Phase, name: impl Into<String>, handler: PhaseHandler) {
        self.inner.subscribe(phase, name, handler);
    }

    /// Build the steppable equivalent of this clock: same dates and week
    /// start, fresh subscriptions (wiring is re-derived at prepare time).
    pub fn to_steppable(&self) -> SimulationClock {
        let mut clock =
            SimulationClock::with_dates(self.inner.configured_start(), self.inner.configured_end());
        clock.set_week_start(self.inner.week_start());
        clock.set_cancellation_mode(self.inner.cancellation_mode());
        clock
    }

    /// Run the whole simulation span in one call: commence, step every
    /// day, then finish. The token is polled once per day; cancellation
    /// stops the loop early and still finishes cleanly.
    ///
    /// Returns the number of days stepped.
    ///
    /// # Errors
    ///
    /// Returns the first [`ClockError`] raised by commencement, any
    /// day's pipeline, or termination.
    pub fn run(&mut self, cancel: CancelToken) -> Result<u64, ClockError> {
        self.inner.commence(cancel.clone())?;

        let mut days: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                debug!(days, "batch run cancelled");
                break;
            }
            let Some(today) = self.inner.today() else {
                break;
            };
            if today > self.inner.end_date()? {
                break;
            }
            self.inner.step()?;
            days = days.saturating_add(1);
        }

        self.inner.done()?;
        Ok(days)
    }
}

impl Clock for BatchClock {
    fn today(&self) -> Option<NaiveDate> {
        self.inner.today()
    }

    fn start_date(&self) -> Result<NaiveDate, ClockError> {
        self.inner.start_date()
    }

    fn end_date(&self) -> Result<NaiveDate, ClockError> {
        self.inner.end_date()
    }

    fn fraction_complete(&self) -> Result<f64, ClockError> {
        self.inner.fraction_complete()
    }
}

impl std::fmt::Debug for BatchClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchClock").field("inner", &self.inner).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::bus::Dispatch;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn clock(start: NaiveDate, end: NaiveDate) -> SimulationClock {
        SimulationClock::with_dates(Some(start), Some(end))
    }

    /// Subscribe a recording handle to the given phases; fired phases
    /// land in the returned log in firing order.
    fn record(
        clock: &mut SimulationClock,
        phases: &[Phase],
    ) -> Arc<Mutex<Vec<Phase>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for &phase in phases {
            let log = Arc::clone(&log);
            clock.subscribe(
                phase,
                format!("recorder:{phase}"),
                Box::new(move |fired, _ctx| {
                    log.lock().unwrap().push(fired);
                    Ok(Dispatch::Handled)
                }),
            );
        }
        log
    }

    fn all_daily_phases() -> Vec<Phase> {
        DAILY_PIPELINE.iter().map(|entry| entry.phase).collect()
    }

    #[test]
    fn commence_sets_today_and_fires_setup_signals() {
        let mut c = clock(date(2020, 1, 1), date(2020, 1, 3));
        let log = record(
            &mut c,
            &[
                Phase::Commencing,
                Phase::DoCommence,
                Phase::StartOfSimulation,
                Phase::FinalInitialise,
            ],
        );

        c.commence(CancelToken::new()).unwrap();
        assert_eq!(c.today(), Some(date(2020, 1, 1)));
        assert_eq!(c.lifecycle(), Lifecycle::Running);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Phase::Commencing,
                Phase::DoCommence,
                Phase::StartOfSimulation,
                Phase::FinalInitialise,
            ]
        );
    }

    #[test]
    fn step_before_commence_is_an_error() {
        let mut c = clock(date(2020, 1, 1), date(2020, 1, 3));
        assert!(matches!(
            c.step(),
            Err(ClockError::Lifecycle {
                operation: "step",
                ..
            })
        ));
    }

    #[test]
    fn commence_twice_is_an_error() {
        let mut c = clock(date(2020, 1, 1), date(2020, 1, 3));
        c.commence(CancelToken::new()).unwrap();
        assert!(matches!(
            c.commence(CancelToken::new()),
            Err(ClockError::Lifecycle {
                operation: "commence",
                ..
            })
        ));
    }

    #[test]
    fn step_fires_the_pipeline_in_table_order() {
        // 2020-01-01 is a Wednesday: month and year gates hold, the
        // (default Sunday) week gate does not.
        let mut c = clock(date(2020, 1, 1), date(2020, 1, 3));
        let log = record(&mut c, &all_daily_phases());

        c.commence(CancelToken::new()).unwrap();
        log.lock().unwrap().clear();
        c.step().unwrap();

        let expected: Vec<Phase> = DAILY_PIPELINE
            .iter()
            .filter(|entry| entry.gate.holds(date(2020, 1, 1), Weekday::Sun))
            .map(|entry| entry.phase)
            .collect();
        assert_eq!(*log.lock().unwrap(), expected);
        assert!(!expected.contains(&Phase::StartOfWeek));
        assert!(expected.contains(&Phase::StartOfMonth));
        assert!(expected.contains(&Phase::StartOfYear));
    }

    #[test]
    fn order_is_independent_of_subscription_order() {
        let mut c = clock(date(2020, 3, 10), date(2020, 3, 12));
        // Subscribe in reverse pipeline order; firing order must not change.
        let mut reversed = all_daily_phases();
        reversed.reverse();
        let log = record(&mut c, &reversed);

        c.commence(CancelToken::new()).unwrap();
        log.lock().unwrap().clear();
        c.step().unwrap();

        let expected: Vec<Phase> = DAILY_PIPELINE
            .iter()
            .filter(|entry| entry.gate.holds(date(2020, 3, 10), Weekday::Sun))
            .map(|entry| entry.phase)
            .collect();
        assert_eq!(*log.lock().unwrap(), expected);
    }

    #[test]
    fn three_day_run_reaches_the_end_date() {
        let mut c = clock(date(2020, 1, 1), date(2020, 1, 3));
        let log = record(&mut c, &[Phase::StartOfMonth]);

        c.commence(CancelToken::new()).unwrap();
        assert_eq!(c.step().unwrap(), date(2020, 1, 2));
        assert_eq!(c.step().unwrap(), date(2020, 1, 3));
        assert_eq!(c.step().unwrap(), date(2020, 1, 4));
        c.done().unwrap();

        assert_eq!(c.today(), Some(date(2020, 1, 3)));
        assert_eq!(c.lifecycle(), Lifecycle::Done);
        // StartOfMonth fired on the first step only (today was 2020-01-01).
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn step_past_the_end_is_an_error() {
        let mut c = clock(date(2020, 1, 1), date(2020, 1, 3));
        c.commence(CancelToken::new()).unwrap();
        for _ in 0..3 {
            c.step().unwrap();
        }
        assert!(matches!(c.step(), Err(ClockError::PastEnd { .. })));
    }

    #[test]
    fn step_after_done_is_an_error() {
        let mut c = clock(date(2020, 1, 1), date(2020, 1, 1));
        c.commence(CancelToken::new()).unwrap();
        c.step().unwrap();
        c.done().unwrap();
        assert!(matches!(
            c.step(),
            Err(ClockError::Lifecycle {
                operation: "step",
                state: Lifecycle::Done,
            })
        ));
    }

    #[test]
    fn done_before_commence_is_an_error() {
        let mut c = clock(date(2020, 1, 1), date(2020, 1, 3));
        assert!(matches!(
            c.done(),
            Err(ClockError::Lifecycle {
                operation: "done",
                ..
            })
        ));
    }

    #[test]
    fn week_start_is_configurable() {
        // 2020-01-06 is a Monday.
        let mut c = clock(date(2020, 1, 6), date(2020, 1, 8));
        c.set_week_start(Weekday::Mon);
        let log = record(&mut c, &[Phase::StartOfWeek]);

        c.commence(CancelToken::new()).unwrap();
        c.step().unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
        c.step().unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn dates_resolve_lazily_from_a_span_source() {
        let mut c = SimulationClock::new();
        assert!(matches!(
            c.start_date(),
            Err(ClockError::Configuration { what: "start" })
        ));
        assert!(matches!(
            c.end_date(),
            Err(ClockError::Configuration { what: "end" })
        ));

        // A source attached after construction is honored on the next read.
        c.set_span_source(Box::new(|| {
            Some((
                NaiveDate::from_ymd_opt(2021, 5, 1)?,
                NaiveDate::from_ymd_opt(2021, 5, 10)?,
            ))
        }));
        assert_eq!(c.start_date().unwrap(), date(2021, 5, 1));
        assert_eq!(c.end_date().unwrap(), date(2021, 5, 10));
        c.commence(CancelToken::new()).unwrap();
        assert_eq!(c.today(), Some(date(2021, 5, 1)));
    }

    #[test]
    fn explicit_dates_win_over_the_span_source() {
        let mut c = clock(date(2020, 1, 1), date(2020, 1, 3));
        c.set_span_source(Box::new(|| {
            Some((
                NaiveDate::from_ymd_opt(1999, 1, 1)?,
                NaiveDate::from_ymd_opt(1999, 12, 31)?,
            ))
        }));
        assert_eq!(c.start_date().unwrap(), date(2020, 1, 1));
        assert_eq!(c.end_date().unwrap(), date(2020, 1, 3));
    }

    #[test]
    fn fraction_complete_progresses_monotonically() {
        let mut c = clock(date(2020, 1, 1), date(2020, 1, 3));
        assert!(c.fraction_complete().unwrap().abs() < f64::EPSILON);

        c.commence(CancelToken::new()).unwrap();
        let mut previous = c.fraction_complete().unwrap();
        assert!(previous.abs() < f64::EPSILON);

        for _ in 0..3 {
            c.step().unwrap();
            let current = c.fraction_complete().unwrap();
            assert!(current >= previous);
            previous = current;
        }
        c.done().unwrap();
        assert!((c.fraction_complete().unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn single_day_run_is_immediately_complete() {
        let mut c = clock(date(2020, 6, 15), date(2020, 6, 15));
        assert!(c.fraction_complete().unwrap().abs() < f64::EPSILON);
        c.commence(CancelToken::new()).unwrap();
        assert!((c.fraction_complete().unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn subscriber_failure_aborts_the_day() {
        let mut c = clock(date(2020, 1, 1), date(2020, 1, 3));
        let late = record(&mut c, &[Phase::EndOfDay]);
        c.subscribe(
            Phase::DoPhenology,
            "phenology",
            Box::new(|_phase, _ctx| Err("stage table exhausted".into())),
        );

        c.commence(CancelToken::new()).unwrap();
        let err = c.step().unwrap_err();
        assert!(matches!(err, ClockError::Subscriber(_)));

        // The day did not advance and later phases never fired.
        assert_eq!(c.today(), Some(date(2020, 1, 1)));
        assert!(late.lock().unwrap().is_empty());
    }

    #[test]
    fn done_notifies_the_message_sink() {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink_log = Arc::clone(&messages);

        let mut c = clock(date(2020, 1, 1), date(2020, 1, 2));
        c.set_message_sink(Box::new(move |source, text, severity| {
            sink_log
                .lock()
                .unwrap()
                .push((source.to_owned(), text.to_owned(), severity));
        }));

        c.commence(CancelToken::new()).unwrap();
        c.done().unwrap();

        let messages = messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        let (source, text, severity) = messages.first().unwrap();
        assert_eq!(source, "Clock");
        assert_eq!(text, "Simulation terminated normally");
        assert_eq!(*severity, Severity::Information);
    }

    #[test]
    fn enforced_cancellation_stops_stepping() {
        let mut c = clock(date(2020, 1, 1), date(2020, 1, 10));
        c.set_cancellation_mode(CancellationMode::Enforced);
        let token = CancelToken::new();
        c.commence(token.clone()).unwrap();

        c.step().unwrap();
        token.cancel();
        assert!(matches!(
            c.step(),
            Err(ClockError::Cancelled { operation: "step" })
        ));
    }

    #[test]
    fn advisory_cancellation_leaves_stepping_to_the_caller() {
        let mut c = clock(date(2020, 1, 1), date(2020, 1, 10));
        let token = CancelToken::new();
        c.commence(token.clone()).unwrap();

        token.cancel();
        // Advisory mode: the clock keeps stepping; stopping is the
        // caller's decision.
        assert!(c.step().is_ok());
    }

    #[test]
    fn listeners_observe_the_token() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&observed);

        let mut c = clock(date(2020, 1, 1), date(2020, 1, 3));
        c.subscribe(
            Phase::StartOfDay,
            "watcher",
            Box::new(move |_phase, ctx| {
                log.lock().unwrap().push(ctx.cancel.is_cancelled());
                Ok(Dispatch::Handled)
            }),
        );

        let token = CancelToken::new();
        c.commence(token.clone()).unwrap();
        c.step().unwrap();
        token.cancel();
        c.step().unwrap();

        assert_eq!(*observed.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn batch_clock_runs_to_completion() {
        let mut batch = BatchClock::with_dates(Some(date(2020, 1, 1)), Some(date(2020, 1, 5)));
        let days_seen = Arc::new(Mutex::new(0_u32));
        let counter = Arc::clone(&days_seen);
        batch.subscribe(
            Phase::StartOfDay,
            "counter",
            Box::new(move |_phase, _ctx| {
                let mut count = counter.lock().unwrap();
                *count = count.saturating_add(1);
                Ok(Dispatch::Handled)
            }),
        );

        let days = batch.run(CancelToken::new()).unwrap();
        assert_eq!(days, 5);
        assert_eq!(*days_seen.lock().unwrap(), 5);
        assert_eq!(batch.today(), Some(date(2020, 1, 5)));
    }

    #[test]
    fn batch_clock_polls_cancellation_per_day() {
        let mut batch = BatchClock::with_dates(Some(date(2020, 1, 1)), Some(date(2020, 12, 31)));
        let token = CancelToken::new();

        // Cancel after the third day from inside a listener; the loop's
        // once-per-day poll stops before day four.
        let trip = token.clone();
        let fired = Arc::new(Mutex::new(0_u32));
        let counter = Arc::clone(&fired);
        batch.subscribe(
            Phase::EndOfDay,
            "tripwire",
            Box::new(move |_phase, _ctx| {
                let mut count = counter.lock().unwrap();
                *count = count.saturating_add(1);
                if *count == 3 {
                    trip.cancel();
                }
                Ok(Dispatch::Handled)
            }),
        );

        let days = batch.run(token).unwrap();
        assert_eq!(days, 3);
        // Finished cleanly at the end date despite stopping early.
        assert_eq!(batch.today(), Some(date(2020, 12, 31)));
    }

    #[test]
    fn batch_clock_converts_to_steppable() {
        let mut batch = BatchClock::with_dates(Some(date(2020, 1, 1)), Some(date(2020, 1, 3)));
        batch.set_week_start(Weekday::Mon);

        let steppable = batch.to_steppable();
        assert_eq!(steppable.configured_start(), Some(date(2020, 1, 1)));
        assert_eq!(steppable.configured_end(), Some(date(2020, 1, 3)));
        assert_eq!(steppable.week_start(), Weekday::Mon);
        assert_eq!(steppable.lifecycle(), Lifecycle::NotStarted);
    }

    #[test]
    fn month_and_year_boundary_queries() {
        let mut c = clock(date(2020, 12, 31), date(2021, 1, 1));
        assert!(!c.is_start_month());
        assert!(!c.is_end_month());

        c.commence(CancelToken::new()).unwrap();
        assert!(c.is_end_month());
        assert!(c.is_end_year());
        assert!(!c.is_start_month());

        c.step().unwrap();
        assert!(c.is_start_month());
        assert!(c.is_start_year());
        assert!(!c.is_end_year());
    }
}
