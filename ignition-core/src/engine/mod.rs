//! Ignition timing state machine.
//!
//! [`Engine::advance`] is a pure transition function: it consumes a rotation
//! edge or a timer expiry, updates the owned state, and returns a
//! [`Transition`] describing the coil level to apply and what to do with the
//! one-shot timer. Platform code executes the transition; the engine never
//! touches hardware.
//!
//! Every cycle start bumps a generation counter and every armed deadline
//! carries it. A timer callback that was already in flight when a new edge
//! arrived therefore reports a stale generation and is dropped.

#![allow(clippy::cast_precision_loss)]

use core::fmt;

use crate::device::DataField;
use crate::diagnostics;
use crate::predictor::{MAX_PLAUSIBLE_PERIOD_US, PeriodPredictor, PredictorConfig, SampleVerdict};
use crate::tick::{Ticks, elapsed_us};
use crate::timing::{
    DEFAULT_TEMPLATE, EventSchedule, TemplateError, TimingEvent, TimingState, TimingTemplate,
};

/// Cycle counter stamped on every armed deadline.
pub type Generation = u32;

/// Shortest rotation period accepted for scheduling (12,000 rpm).
pub const MIN_PERIOD_US: u32 = 5_000;
/// Longest rotation period accepted for scheduling (500 rpm).
pub const MAX_PERIOD_US: u32 = MAX_PLAUSIBLE_PERIOD_US;
/// Allowed relative gap between the forecast and the measured period.
pub const FORECAST_TOLERANCE: f32 = 0.2;

const MICROS_PER_MINUTE: u32 = 60_000_000;

/// Converts a rotation period to revolutions per minute, rounding to nearest.
#[must_use]
pub const fn rpm_from_period(period_us: u32) -> u32 {
    if period_us == 0 {
        return 0;
    }
    (MICROS_PER_MINUTE + period_us / 2) / period_us
}

/// Bounds applied before a cycle is scheduled.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TimingConfig {
    pub min_period_us: u32,
    pub max_period_us: u32,
    pub forecast_tolerance: f32,
}

impl TimingConfig {
    pub const fn new(min_period_us: u32, max_period_us: u32, forecast_tolerance: f32) -> Self {
        Self {
            min_period_us,
            max_period_us,
            forecast_tolerance,
        }
    }

    /// Decides whether a cycle with this measurement and forecast may be scheduled.
    pub fn check(&self, measured_us: u32, forecast_us: u32) -> Result<(), RejectReason> {
        if forecast_us >= self.max_period_us {
            return Err(RejectReason::ForecastOutOfRange);
        }
        if measured_us <= self.min_period_us {
            return Err(RejectReason::PeriodTooShort);
        }

        let measured = measured_us as f32;
        let forecast = forecast_us as f32;
        let lower = measured * (1.0 - self.forecast_tolerance);
        let upper = measured * (1.0 + self.forecast_tolerance);
        if forecast < lower || forecast > upper {
            return Err(RejectReason::ForecastDiverged);
        }
        Ok(())
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self::new(MIN_PERIOD_US, MAX_PERIOD_US, FORECAST_TOLERANCE)
    }
}

/// Why a cycle fell back to the fail-safe state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RejectReason {
    /// Measured period is at or below the minimum (engine too fast or edge glitch).
    PeriodTooShort,
    /// Forecast is at or above the maximum, including the insufficient-data sentinel.
    ForecastOutOfRange,
    /// Forecast disagrees with the measured period by more than the tolerance.
    ForecastDiverged,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::PeriodTooShort => f.write_str("period-too-short"),
            RejectReason::ForecastOutOfRange => f.write_str("forecast-out-of-range"),
            RejectReason::ForecastDiverged => f.write_str("forecast-diverged"),
        }
    }
}

/// Asynchronous inputs the engine reacts to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EngineInput {
    /// Rotation reference edge observed at `now`.
    EdgeFired { now: Ticks },
    /// One-shot timer armed for `generation` expired at `now`.
    TimerExpired { now: Ticks, generation: Generation },
}

/// Instruction for the one-shot timer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Schedule {
    /// Program a deadline `after_us` after the input timestamp.
    Arm { after_us: u32, generation: Generation },
    /// Stop any pending deadline.
    Cancel,
    /// Leave the timer as it is.
    Idle,
}

/// What the engine decided, for telemetry and logging.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransitionNote {
    /// Input arrived before [`Engine::start`].
    NotStarted,
    /// Engine (re)started; coil forced off.
    Started,
    /// First edge after start; nothing to measure yet.
    Primed,
    CycleAccepted {
        period_us: u32,
        forecast_us: u32,
        sample: SampleVerdict,
    },
    CycleRejected {
        period_us: u32,
        forecast_us: u32,
        sample: SampleVerdict,
        reason: RejectReason,
    },
    /// Timer moved the sequence to a non-halting event.
    Advanced { state: TimingState, elapsed_us: u32 },
    /// Timer moved the sequence to a halting event.
    Halted { state: TimingState, elapsed_us: u32 },
    /// Expiry carried the generation of an earlier cycle.
    StaleTimer { generation: Generation },
    /// Expiry arrived while nothing was armed.
    Spurious,
}

/// Result of one [`Engine::advance`] call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Transition {
    /// State whose coil level must be applied, if any.
    pub actuate: Option<TimingState>,
    pub schedule: Schedule,
    pub note: TransitionNote,
}

impl Transition {
    const fn idle(note: TransitionNote) -> Self {
        Self {
            actuate: None,
            schedule: Schedule::Idle,
            note,
        }
    }

    const fn fail_safe(note: TransitionNote) -> Self {
        Self {
            actuate: Some(TimingState::Invalid),
            schedule: Schedule::Cancel,
            note,
        }
    }
}

/// Live engine bookkeeping, also served through the diagnostics interface.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EngineState {
    pub initialized: bool,
    pub current_event: usize,
    pub current_state: TimingState,
    pub last_edge_tick: Option<Ticks>,
    pub last_period_us: u32,
    pub predicted_period_us: u32,
    pub rpm_estimate: u32,
    pub armed: bool,
    pub generation: Generation,
}

impl EngineState {
    pub const fn new() -> Self {
        Self {
            initialized: false,
            current_event: 0,
            current_state: TimingState::Invalid,
            last_edge_tick: None,
            last_period_us: 0,
            predicted_period_us: 0,
            rpm_estimate: 0,
            armed: false,
            generation: 0,
        }
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Owned ignition context: state, event schedule, and period predictor.
#[derive(Clone, Debug)]
pub struct Engine {
    state: EngineState,
    schedule: EventSchedule,
    predictor: PeriodPredictor,
    config: TimingConfig,
}

impl Engine {
    /// Engine using the default template and bounds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: EngineState::new(),
            schedule: EventSchedule::new(&DEFAULT_TEMPLATE),
            predictor: PeriodPredictor::new(0),
            config: TimingConfig::default(),
        }
    }

    /// Engine with an explicit template and tunables.
    pub fn with_template(
        template: &TimingTemplate,
        config: TimingConfig,
        predictor: PredictorConfig,
    ) -> Result<Self, TemplateError> {
        template.validate()?;
        Ok(Self {
            state: EngineState::new(),
            schedule: EventSchedule::new(template),
            predictor: PeriodPredictor::with_config(predictor, 0),
            config,
        })
    }

    #[must_use]
    pub const fn state(&self) -> &EngineState {
        &self.state
    }

    #[must_use]
    pub const fn schedule(&self) -> &EventSchedule {
        &self.schedule
    }

    #[must_use]
    pub const fn predictor(&self) -> &PeriodPredictor {
        &self.predictor
    }

    #[must_use]
    pub const fn config(&self) -> &TimingConfig {
        &self.config
    }

    /// Brings the engine up in the fail-safe state. Inputs before this are ignored.
    pub fn start(&mut self, now: Ticks) -> Transition {
        self.state = EngineState {
            initialized: true,
            generation: self.state.generation.wrapping_add(1),
            ..EngineState::new()
        };
        self.predictor.reset(now);
        Transition::fail_safe(TransitionNote::Started)
    }

    /// Applies one input and reports what the platform must do.
    pub fn advance(&mut self, input: EngineInput) -> Transition {
        if !self.state.initialized {
            return Transition::idle(TransitionNote::NotStarted);
        }
        match input {
            EngineInput::EdgeFired { now } => self.on_edge(now),
            EngineInput::TimerExpired { now, generation } => self.on_timer(now, generation),
        }
    }

    /// Slow-cadence upkeep; returns `true` when stale predictor data was dropped.
    pub fn housekeeping(&mut self, now: Ticks) -> bool {
        self.state.initialized && self.predictor.periodic_staleness_check(now)
    }

    /// Answers a diagnostics request; `None` means no response.
    #[must_use]
    pub fn ioctl(&self, request: &DataField) -> Option<DataField> {
        diagnostics::respond(&self.state, request)
    }

    fn on_edge(&mut self, now: Ticks) -> Transition {
        self.state.generation = self.state.generation.wrapping_add(1);
        let Some(previous) = self.state.last_edge_tick.replace(now) else {
            self.enter_fail_safe();
            return Transition::fail_safe(TransitionNote::Primed);
        };

        let period_us = elapsed_us(now, previous);
        self.state.last_period_us = period_us;
        self.state.rpm_estimate = rpm_from_period(period_us);

        let sample = self.predictor.log_new_period(period_us, now);
        let forecast_us = self.predictor.predict_next_period();
        self.state.predicted_period_us = forecast_us;

        if let Err(reason) = self.config.check(period_us, forecast_us) {
            self.enter_fail_safe();
            return Transition::fail_safe(TransitionNote::CycleRejected {
                period_us,
                forecast_us,
                sample,
                reason,
            });
        }

        self.schedule.reprogram(period_us);
        let first = *self.schedule.current();
        self.enter(&first);
        self.state.armed = true;

        Transition {
            actuate: Some(first.state()),
            schedule: Schedule::Arm {
                after_us: first.end_offset_us,
                generation: self.state.generation,
            },
            note: TransitionNote::CycleAccepted {
                period_us,
                forecast_us,
                sample,
            },
        }
    }

    fn on_timer(&mut self, now: Ticks, generation: Generation) -> Transition {
        if !self.state.armed {
            return Transition::idle(TransitionNote::Spurious);
        }
        if generation != self.state.generation {
            return Transition::idle(TransitionNote::StaleTimer { generation });
        }

        let since = self.state.last_edge_tick.unwrap_or(now);
        let elapsed = elapsed_us(now, since);
        self.schedule.record_measured(elapsed);

        let Some(next) = self.schedule.advance().copied() else {
            self.state.armed = false;
            return Transition::idle(TransitionNote::Spurious);
        };
        self.enter(&next);

        if next.halts() {
            self.state.armed = false;
            return Transition {
                actuate: Some(next.state()),
                schedule: Schedule::Idle,
                note: TransitionNote::Halted {
                    state: next.state(),
                    elapsed_us: elapsed,
                },
            };
        }

        Transition {
            actuate: Some(next.state()),
            schedule: Schedule::Arm {
                after_us: next.end_offset_us.saturating_sub(elapsed),
                generation: self.state.generation,
            },
            note: TransitionNote::Advanced {
                state: next.state(),
                elapsed_us: elapsed,
            },
        }
    }

    fn enter(&mut self, event: &TimingEvent) {
        self.state.current_event = self.schedule.cursor();
        self.state.current_state = event.state();
    }

    fn enter_fail_safe(&mut self) {
        self.state.current_state = TimingState::Invalid;
        self.state.armed = false;
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::INSUFFICIENT_DATA_PERIOD_US;
    use crate::tick::us_to_ticks;

    /// Started engine that has seen a priming edge at tick 0.
    fn primed() -> Engine {
        let mut engine = Engine::new();
        engine.start(0);
        let primed = engine.advance(EngineInput::EdgeFired { now: 0 });
        assert_eq!(primed.note, TransitionNote::Primed);
        engine
    }

    fn edge_at(engine: &mut Engine, micros: u64) -> Transition {
        engine.advance(EngineInput::EdgeFired {
            now: us_to_ticks(micros),
        })
    }

    #[test]
    fn rpm_rounds_to_nearest() {
        assert_eq!(rpm_from_period(10_000), 6_000);
        assert_eq!(rpm_from_period(7_000), 8_571);
        assert_eq!(rpm_from_period(9_999), 6_001);
        assert_eq!(rpm_from_period(0), 0);
    }

    #[test]
    fn config_checks_bounds_in_order() {
        let config = TimingConfig::default();
        assert_eq!(config.check(10_000, 10_000), Ok(()));
        assert_eq!(config.check(10_000, 8_000), Ok(()));
        assert_eq!(config.check(10_000, 12_000), Ok(()));
        assert_eq!(
            config.check(10_000, 12_001),
            Err(RejectReason::ForecastDiverged)
        );
        assert_eq!(
            config.check(10_000, 7_999),
            Err(RejectReason::ForecastDiverged)
        );
        assert_eq!(
            config.check(5_000, 5_000),
            Err(RejectReason::PeriodTooShort)
        );
        assert_eq!(
            config.check(200_000, INSUFFICIENT_DATA_PERIOD_US),
            Err(RejectReason::ForecastOutOfRange)
        );
    }

    #[test]
    fn inputs_before_start_are_ignored() {
        let mut engine = Engine::new();
        let transition = engine.advance(EngineInput::EdgeFired { now: 10 });
        assert_eq!(transition.note, TransitionNote::NotStarted);
        assert_eq!(transition.actuate, None);
        assert_eq!(transition.schedule, Schedule::Idle);
        assert_eq!(engine.state().last_edge_tick, None);
        assert!(!engine.housekeeping(u64::MAX));
    }

    #[test]
    fn start_forces_fail_safe() {
        let mut engine = Engine::new();
        let transition = engine.start(0);
        assert_eq!(transition.actuate, Some(TimingState::Invalid));
        assert_eq!(transition.schedule, Schedule::Cancel);
        assert!(engine.state().initialized);
    }

    #[test]
    fn warm_up_cycles_are_rejected_until_window_fills() {
        let mut engine = primed();
        for rotation in 1..=4 {
            let transition = edge_at(&mut engine, rotation * 10_000);
            assert!(matches!(
                transition.note,
                TransitionNote::CycleRejected {
                    reason: RejectReason::ForecastOutOfRange,
                    ..
                }
            ));
            assert_eq!(transition.schedule, Schedule::Cancel);
        }

        let transition = edge_at(&mut engine, 50_000);
        assert_eq!(transition.actuate, Some(TimingState::Hold));
        assert_eq!(
            transition.schedule,
            Schedule::Arm {
                after_us: 333,
                generation: engine.state().generation,
            }
        );
        assert_eq!(engine.state().rpm_estimate, 6_000);
        assert_eq!(engine.state().predicted_period_us, 10_000);
        assert!(engine.state().armed);
    }

    #[test]
    fn accepted_cycle_walks_sequence_and_halts() {
        let mut engine = primed();
        for rotation in 1..=5 {
            edge_at(&mut engine, rotation * 10_000);
        }
        let generation = engine.state().generation;
        let edge = 50_000;

        let wait = engine.advance(EngineInput::TimerExpired {
            now: us_to_ticks(edge + 333),
            generation,
        });
        assert_eq!(wait.actuate, Some(TimingState::Wait));
        assert_eq!(
            wait.schedule,
            Schedule::Arm {
                after_us: 9_334,
                generation
            }
        );

        let spark = engine.advance(EngineInput::TimerExpired {
            now: us_to_ticks(edge + 9_667),
            generation,
        });
        assert_eq!(spark.actuate, Some(TimingState::Spark));
        assert_eq!(
            spark.schedule,
            Schedule::Arm {
                after_us: 333,
                generation
            }
        );

        let halt = engine.advance(EngineInput::TimerExpired {
            now: us_to_ticks(edge + 10_000),
            generation,
        });
        assert_eq!(halt.actuate, Some(TimingState::Invalid));
        assert_eq!(halt.schedule, Schedule::Idle);
        assert!(!engine.state().armed);

        let measured = engine.schedule().events().map(|event| event.measured_us);
        assert_eq!(measured, [Some(333), Some(9_667), Some(10_000), None]);
    }

    #[test]
    fn spurious_expiry_after_halt_does_nothing() {
        let mut engine = primed();
        for rotation in 1..=5 {
            edge_at(&mut engine, rotation * 10_000);
        }
        let generation = engine.state().generation;
        for offset in [333, 9_667, 10_000] {
            engine.advance(EngineInput::TimerExpired {
                now: us_to_ticks(50_000 + offset),
                generation,
            });
        }

        let before = *engine.state();
        let extra = engine.advance(EngineInput::TimerExpired {
            now: us_to_ticks(60_001),
            generation,
        });
        assert_eq!(extra, Transition::idle(TransitionNote::Spurious));
        assert_eq!(*engine.state(), before);
    }

    #[test]
    fn late_expiry_arms_with_zero_delay() {
        let mut engine = primed();
        for rotation in 1..=5 {
            edge_at(&mut engine, rotation * 10_000);
        }
        let generation = engine.state().generation;

        let wait = engine.advance(EngineInput::TimerExpired {
            now: us_to_ticks(50_000 + 9_700),
            generation,
        });
        assert_eq!(
            wait.schedule,
            Schedule::Arm {
                after_us: 0,
                generation
            }
        );
    }

    #[test]
    fn expiry_from_previous_cycle_is_stale() {
        let mut engine = primed();
        for rotation in 1..=5 {
            edge_at(&mut engine, rotation * 10_000);
        }
        let old_generation = engine.state().generation;

        // The next edge lands while the previous cycle's deadline is still in flight.
        edge_at(&mut engine, 60_000);
        let stale = engine.advance(EngineInput::TimerExpired {
            now: us_to_ticks(60_010),
            generation: old_generation,
        });
        assert_eq!(
            stale,
            Transition::idle(TransitionNote::StaleTimer {
                generation: old_generation
            })
        );
        assert_eq!(engine.state().current_state, TimingState::Hold);
        assert_eq!(engine.schedule().cursor(), 0);
    }

    #[test]
    fn implausible_period_is_rejected_without_arming() {
        let mut engine = primed();
        for rotation in 1..=5 {
            edge_at(&mut engine, rotation * 10_000);
        }

        let transition = edge_at(&mut engine, 50_000 + 200_000);
        assert_eq!(transition.actuate, Some(TimingState::Invalid));
        assert_eq!(transition.schedule, Schedule::Cancel);
        assert!(matches!(
            transition.note,
            TransitionNote::CycleRejected {
                period_us: 200_000,
                sample: SampleVerdict::Rejected { streak: 1 },
                reason: RejectReason::ForecastDiverged,
                ..
            }
        ));
        assert!(!engine.state().armed);
        assert_eq!(engine.state().current_state, TimingState::Invalid);
    }

    #[test]
    fn custom_template_is_validated() {
        let mut template = DEFAULT_TEMPLATE;
        template.steps[3].halt_timer = false;
        let result = Engine::with_template(
            &template,
            TimingConfig::default(),
            PredictorConfig::default(),
        );
        assert_eq!(result.err(), Some(TemplateError::FinalEventDoesNotHalt));
    }
}
