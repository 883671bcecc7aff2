//! Log lines for engine transitions and periodic reports.
//!
//! Transitions are first condensed into a [`LogLine`] so the selection and
//! wording can be checked on the host; the emit step goes to defmt on the
//! target and to stdout elsewhere.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use ignition_core::engine::{Transition, TransitionNote};

use crate::status::DiagnosticSnapshot;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Severity {
    Debug,
    Info,
    Warn,
}

/// Condensed, allocation-free description of a transition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LogLine {
    pub severity: Severity,
    pub event: &'static str,
    pub detail: &'static str,
    pub period_us: u32,
    pub forecast_us: u32,
}

impl LogLine {
    const fn new(severity: Severity, event: &'static str) -> Self {
        Self {
            severity,
            event,
            detail: "",
            period_us: 0,
            forecast_us: 0,
        }
    }

    const fn with_periods(mut self, period_us: u32, forecast_us: u32) -> Self {
        self.period_us = period_us;
        self.forecast_us = forecast_us;
        self
    }
}

/// Picks the transitions worth logging. Sub-event steps are too frequent.
pub fn describe(transition: &Transition) -> Option<LogLine> {
    let line = match transition.note {
        TransitionNote::Started => LogLine::new(Severity::Info, "engine started"),
        TransitionNote::Primed => LogLine::new(Severity::Info, "first edge"),
        TransitionNote::CycleAccepted {
            period_us,
            forecast_us,
            ..
        } => LogLine::new(Severity::Debug, "cycle accepted").with_periods(period_us, forecast_us),
        TransitionNote::CycleRejected {
            period_us,
            forecast_us,
            reason,
            ..
        } => LogLine {
            detail: reject_label(reason),
            ..LogLine::new(Severity::Warn, "cycle rejected").with_periods(period_us, forecast_us)
        },
        TransitionNote::StaleTimer { .. } => LogLine::new(Severity::Warn, "stale timer dropped"),
        TransitionNote::Spurious => LogLine::new(Severity::Warn, "spurious timer"),
        TransitionNote::NotStarted
        | TransitionNote::Advanced { .. }
        | TransitionNote::Halted { .. } => return None,
    };
    Some(line)
}

const fn reject_label(reason: ignition_core::engine::RejectReason) -> &'static str {
    use ignition_core::engine::RejectReason;
    match reason {
        RejectReason::PeriodTooShort => "period-too-short",
        RejectReason::ForecastOutOfRange => "forecast-out-of-range",
        RejectReason::ForecastDiverged => "forecast-diverged",
    }
}

/// Logs a transition if [`describe`] selects it.
pub fn log_transition(transition: &Transition) {
    if let Some(line) = describe(transition) {
        emit_line(&line);
    }
}

pub fn log_predictor_reset() {
    emit_line(&LogLine::new(Severity::Warn, "predictor reset after stall"));
}

#[cfg(target_os = "none")]
fn emit_line(line: &LogLine) {
    match line.severity {
        Severity::Debug => defmt::debug!(
            "timing: {} period={}us forecast={}us",
            line.event,
            line.period_us,
            line.forecast_us
        ),
        Severity::Info => defmt::info!("timing: {}", line.event),
        Severity::Warn => defmt::warn!(
            "timing: {} {} period={}us forecast={}us",
            line.event,
            line.detail,
            line.period_us,
            line.forecast_us
        ),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_line(line: &LogLine) {
    println!(
        "timing: {} {} period={}us forecast={}us",
        line.event, line.detail, line.period_us, line.forecast_us
    );
}

#[cfg(target_os = "none")]
pub fn log_snapshot(snapshot: &DiagnosticSnapshot) {
    defmt::info!(
        "report: rpm={} period={}us forecast={}us state={} accepted={} rejected={} resets={} stale={}",
        snapshot.rpm,
        snapshot.period_us,
        snapshot.predicted_us,
        snapshot.state.as_raw(),
        snapshot.accepted,
        snapshot.rejected,
        snapshot.predictor_resets,
        snapshot.stale_timers
    );
}

#[cfg(not(target_os = "none"))]
pub fn log_snapshot(snapshot: &DiagnosticSnapshot) {
    println!(
        "report: rpm={} period={}us forecast={}us state={} accepted={} rejected={} resets={} stale={}",
        snapshot.rpm,
        snapshot.period_us,
        snapshot.predicted_us,
        snapshot.state,
        snapshot.accepted,
        snapshot.rejected,
        snapshot.predictor_resets,
        snapshot.stale_timers
    );
}
