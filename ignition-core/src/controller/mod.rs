//! Platform adapter around the ignition [`Engine`].
//!
//! [`IgnitionController`] owns the engine together with the three platform
//! collaborators it needs (a [`TickSource`], a coil [`Actuator`], and a
//! [`OneShotTimer`]). Firmware and emulator call its entry points from their
//! edge, timer, and housekeeping handlers; the controller reads the clock,
//! feeds the engine, and executes the returned [`Transition`] in the fixed
//! order cancel, actuate, arm.

use crate::device::{Actuator, DataField, DeviceDispatch, DeviceId, TIMING_DEVICE_ID};
use crate::engine::{Engine, EngineInput, Generation, Schedule, Transition, TransitionNote};
use crate::predictor::SampleVerdict;
use crate::telemetry::TelemetryRecorder;
use crate::tick::{TickSource, Ticks, elapsed_us};

/// Single-deadline timer driving the sub-event chain.
///
/// Scheduling replaces any pending deadline. When the deadline passes the
/// platform calls [`IgnitionController::on_timer_expired`] with the
/// generation it was armed with.
pub trait OneShotTimer {
    fn schedule(&mut self, after_us: u32, generation: Generation);

    fn cancel(&mut self);
}

/// Timer that never fires.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopTimer;

impl OneShotTimer for NoopTimer {
    fn schedule(&mut self, _: u32, _: Generation) {}

    fn cancel(&mut self) {}
}

/// Engine plus the collaborators needed to run it on a platform.
pub struct IgnitionController<T, A, O> {
    engine: Engine,
    ticks: T,
    actuator: A,
    timer: O,
    telemetry: TelemetryRecorder,
}

impl<T, A, O> IgnitionController<T, A, O>
where
    T: TickSource,
    A: Actuator,
    O: OneShotTimer,
{
    /// Controller running the default engine.
    pub fn new(ticks: T, actuator: A, timer: O) -> Self {
        Self::with_engine(Engine::new(), ticks, actuator, timer)
    }

    /// Controller running a pre-configured engine.
    pub fn with_engine(engine: Engine, ticks: T, actuator: A, timer: O) -> Self {
        Self {
            engine,
            ticks,
            actuator,
            timer,
            telemetry: TelemetryRecorder::new(),
        }
    }

    /// Rebases the tick source and brings the engine up with the coil off.
    pub fn start(&mut self) -> Transition {
        self.ticks.reset();
        let now = self.ticks.now();
        let transition = self.engine.start(now);
        self.execute(&transition, now);
        transition
    }

    /// Rotation edge entry point.
    pub fn on_rotation_edge(&mut self) -> Transition {
        let now = self.ticks.now();
        let transition = self.engine.advance(EngineInput::EdgeFired { now });
        self.execute(&transition, now);

        if let TransitionNote::CycleAccepted { sample, .. }
        | TransitionNote::CycleRejected { sample, .. } = transition.note
            && sample == SampleVerdict::Reset
        {
            self.telemetry.record_predictor_reset(now);
        }
        transition
    }

    /// Sub-event timer entry point.
    pub fn on_timer_expired(&mut self, generation: Generation) -> Transition {
        let now = self.ticks.now();
        // Only the deadline of the live cycle may be stopped; a stale callback
        // must not clear the deadline a newer edge has just armed.
        if generation == self.engine.state().generation {
            self.timer.cancel();
        }
        let transition = self
            .engine
            .advance(EngineInput::TimerExpired { now, generation });
        self.execute(&transition, now);
        transition
    }

    /// Slow periodic entry point; returns `true` when stale predictor data was dropped.
    pub fn on_housekeeping(&mut self) -> bool {
        let now = self.ticks.now();
        let reset = self.engine.housekeeping(now);
        if reset {
            self.telemetry.record_predictor_reset(now);
        }
        reset
    }

    /// Serves a timing diagnostics request.
    #[must_use]
    pub fn ioctl(&self, request: &DataField) -> Option<DataField> {
        self.engine.ioctl(request)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    pub fn ticks(&self) -> &T {
        &self.ticks
    }

    pub fn ticks_mut(&mut self) -> &mut T {
        &mut self.ticks
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }

    pub fn timer(&self) -> &O {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut O {
        &mut self.timer
    }

    fn execute(&mut self, transition: &Transition, input_at: Ticks) {
        if transition.schedule == Schedule::Cancel {
            self.timer.cancel();
        }
        if let Some(state) = transition.actuate {
            self.actuator.apply(state.coil_level());
        }
        if let Schedule::Arm {
            after_us,
            generation,
        } = transition.schedule
        {
            // Deadlines are relative to the input timestamp; subtract the
            // handler latency accumulated since then.
            let lag_us = elapsed_us(self.ticks.now(), input_at);
            self.timer
                .schedule(after_us.saturating_sub(lag_us), generation);
        }
        self.telemetry.record_transition(transition, input_at);
    }
}

/// Exposes the diagnostics interface on [`TIMING_DEVICE_ID`]; other ids get an empty payload.
impl<T, A, O> DeviceDispatch for IgnitionController<T, A, O>
where
    T: TickSource,
    A: Actuator,
    O: OneShotTimer,
{
    fn ioctl(&mut self, id: DeviceId, request: &DataField) -> DataField {
        if id != TIMING_DEVICE_ID {
            return DataField::empty();
        }
        self.engine.ioctl(request).unwrap_or_default()
    }
}
