#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! The timing task stores the latest engine figures in atomics after every
//! housekeeping pass, and periodically publishes a [`DiagnosticSnapshot`]
//! through a [`SnapshotSignal`] so the report task can log it without
//! touching the controller.

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::signal::Signal;
use ignition_core::engine::EngineState;
use ignition_core::telemetry::TelemetryCounters;
use ignition_core::timing::TimingState;
use portable_atomic::{AtomicU32, Ordering};

#[cfg(target_os = "none")]
type StatusMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type StatusMutex = NoopRawMutex;

/// Latest-value mailbox between the timing task and the report task.
pub type SnapshotSignal = Signal<StatusMutex, DiagnosticSnapshot>;

static RPM: AtomicU32 = AtomicU32::new(0);
static PERIOD_US: AtomicU32 = AtomicU32::new(0);
static PREDICTED_US: AtomicU32 = AtomicU32::new(0);
static STATE: AtomicU32 = AtomicU32::new(0);
static ACCEPTED: AtomicU32 = AtomicU32::new(0);
static REJECTED: AtomicU32 = AtomicU32::new(0);
static PREDICTOR_RESETS: AtomicU32 = AtomicU32::new(0);
static STALE_TIMERS: AtomicU32 = AtomicU32::new(0);

/// Point-in-time view of the ignition engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DiagnosticSnapshot {
    pub rpm: u32,
    pub period_us: u32,
    pub predicted_us: u32,
    pub state: TimingState,
    pub accepted: u32,
    pub rejected: u32,
    pub predictor_resets: u32,
    pub stale_timers: u32,
}

/// Stores the current engine figures.
pub fn record(state: &EngineState, counters: &TelemetryCounters) {
    RPM.store(state.rpm_estimate, Ordering::Relaxed);
    PERIOD_US.store(state.last_period_us, Ordering::Relaxed);
    PREDICTED_US.store(state.predicted_period_us, Ordering::Relaxed);
    STATE.store(state.current_state.as_raw(), Ordering::Relaxed);
    ACCEPTED.store(counters.accepted, Ordering::Relaxed);
    REJECTED.store(counters.rejected, Ordering::Relaxed);
    PREDICTOR_RESETS.store(counters.predictor_resets, Ordering::Relaxed);
    STALE_TIMERS.store(counters.stale_timers, Ordering::Relaxed);
}

/// Builds a [`DiagnosticSnapshot`] from the stored figures.
pub fn snapshot() -> DiagnosticSnapshot {
    DiagnosticSnapshot {
        rpm: RPM.load(Ordering::Relaxed),
        period_us: PERIOD_US.load(Ordering::Relaxed),
        predicted_us: PREDICTED_US.load(Ordering::Relaxed),
        state: TimingState::from_raw(STATE.load(Ordering::Relaxed)).unwrap_or_default(),
        accepted: ACCEPTED.load(Ordering::Relaxed),
        rejected: REJECTED.load(Ordering::Relaxed),
        predictor_resets: PREDICTOR_RESETS.load(Ordering::Relaxed),
        stale_timers: STALE_TIMERS.load(Ordering::Relaxed),
    }
}
