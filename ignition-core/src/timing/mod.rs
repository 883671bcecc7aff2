//! Ignition event sequence shared by firmware and host targets.
//!
//! A rotation is split into a fixed series of sub-events. Each event holds
//! the coil in one state from its start offset until the next event begins.
//! Templates are immutable and `const`; the engine copies one into an
//! [`EventSchedule`] and recomputes the offsets from every measured period.

#![allow(clippy::cast_precision_loss)]

use core::fmt;

use crate::device::CoilLevel;

pub mod default;

pub use default::{DEFAULT_TEMPLATE, default_template};

/// Number of sub-events in one rotation.
pub const EVENT_COUNT: usize = 4;

/// Coil phase within a rotation.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TimingState {
    /// Fail-safe: coil off, nothing scheduled.
    #[default]
    Invalid,
    /// Dwell: coil charging.
    Hold,
    /// Coil off between dwell and spark.
    Wait,
    /// Coil on for the spark window.
    Spark,
}

impl TimingState {
    /// Numeric code reported over the diagnostics interface.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        match self {
            TimingState::Invalid => 0,
            TimingState::Hold => 1,
            TimingState::Wait => 2,
            TimingState::Spark => 3,
        }
    }

    /// Attempts to decode a diagnostics state code.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(TimingState::Invalid),
            1 => Some(TimingState::Hold),
            2 => Some(TimingState::Wait),
            3 => Some(TimingState::Spark),
            _ => None,
        }
    }

    /// Coil level the actuator must hold while in this state.
    #[must_use]
    pub const fn coil_level(self) -> CoilLevel {
        match self {
            TimingState::Hold | TimingState::Spark => CoilLevel::Energized,
            TimingState::Wait | TimingState::Invalid => CoilLevel::Deenergized,
        }
    }
}

impl fmt::Display for TimingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TimingState::Invalid => "invalid",
            TimingState::Hold => "hold",
            TimingState::Wait => "wait",
            TimingState::Spark => "spark",
        };
        f.write_str(label)
    }
}

/// One entry of a [`TimingTemplate`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EventStep {
    pub state: TimingState,
    /// When set, the timer stays stopped once this event is entered.
    pub halt_timer: bool,
    /// Start of the event as a fraction of one rotation.
    pub time_fraction: f32,
}

impl EventStep {
    pub const fn new(state: TimingState, halt_timer: bool, time_fraction: f32) -> Self {
        Self {
            state,
            halt_timer,
            time_fraction,
        }
    }
}

/// Reasons a template cannot drive the engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TemplateError {
    /// A fraction lies outside `0.0..=1.0` or is not a number.
    FractionOutOfRange { index: usize },
    /// A fraction is smaller than the one before it.
    FractionsNotMonotonic { index: usize },
    /// The first event would leave the coil in the fail-safe state.
    FirstEventInvalid,
    /// The final event would keep re-arming the timer.
    FinalEventDoesNotHalt,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::FractionOutOfRange { index } => {
                write!(f, "event {index}: fraction outside 0..=1")
            }
            TemplateError::FractionsNotMonotonic { index } => {
                write!(f, "event {index}: fraction decreases")
            }
            TemplateError::FirstEventInvalid => f.write_str("first event is invalid"),
            TemplateError::FinalEventDoesNotHalt => f.write_str("final event does not halt"),
        }
    }
}

/// Immutable event sequence for one rotation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TimingTemplate {
    pub steps: [EventStep; EVENT_COUNT],
}

impl TimingTemplate {
    pub const fn new(steps: [EventStep; EVENT_COUNT]) -> Self {
        Self { steps }
    }

    /// Checks the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), TemplateError> {
        let mut previous = 0.0_f32;
        for (index, step) in self.steps.iter().enumerate() {
            if !(0.0..=1.0).contains(&step.time_fraction) {
                return Err(TemplateError::FractionOutOfRange { index });
            }
            if step.time_fraction < previous {
                return Err(TemplateError::FractionsNotMonotonic { index });
            }
            previous = step.time_fraction;
        }

        if self.steps[0].state == TimingState::Invalid {
            return Err(TemplateError::FirstEventInvalid);
        }
        if !self.steps[EVENT_COUNT - 1].halt_timer {
            return Err(TemplateError::FinalEventDoesNotHalt);
        }
        Ok(())
    }
}

/// Template event with the offsets derived for the current rotation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TimingEvent {
    pub step: EventStep,
    /// Position of the event in the rotation (µs after the edge).
    pub start_offset_us: u32,
    /// Position of the next event, or the full period for the last one.
    pub end_offset_us: u32,
    /// Elapsed time since the edge when the event actually completed.
    pub measured_us: Option<u32>,
}

impl TimingEvent {
    const fn from_step(step: EventStep) -> Self {
        Self {
            step,
            start_offset_us: 0,
            end_offset_us: 0,
            measured_us: None,
        }
    }

    /// Coil phase entered by this event.
    #[must_use]
    pub const fn state(&self) -> TimingState {
        self.step.state
    }

    /// Returns `true` when entering this event stops the timer chain.
    #[must_use]
    pub const fn halts(&self) -> bool {
        self.step.halt_timer
    }
}

/// Mutable copy of a template with a cursor over the active event.
#[derive(Clone, Debug, PartialEq)]
pub struct EventSchedule {
    events: [TimingEvent; EVENT_COUNT],
    cursor: usize,
}

impl EventSchedule {
    /// Builds a schedule from a template; offsets stay zero until [`reprogram`](Self::reprogram).
    #[must_use]
    pub fn new(template: &TimingTemplate) -> Self {
        Self {
            events: template.steps.map(TimingEvent::from_step),
            cursor: 0,
        }
    }

    /// Recomputes every event offset for a rotation of `period_us` and rewinds the cursor.
    pub fn reprogram(&mut self, period_us: u32) {
        for index in 0..EVENT_COUNT {
            let start = fraction_of(self.events[index].step.time_fraction, period_us);
            let end = match self.events.get(index + 1) {
                Some(next) => fraction_of(next.step.time_fraction, period_us),
                None => period_us,
            };
            let event = &mut self.events[index];
            event.start_offset_us = start;
            event.end_offset_us = end;
            event.measured_us = None;
        }
        self.cursor = 0;
    }

    /// Index of the active event.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Active event.
    #[must_use]
    pub fn current(&self) -> &TimingEvent {
        &self.events[self.cursor]
    }

    /// Moves to the next event, returning it, or `None` at the end of the sequence.
    pub fn advance(&mut self) -> Option<&TimingEvent> {
        if self.cursor + 1 >= EVENT_COUNT {
            return None;
        }
        self.cursor += 1;
        Some(&self.events[self.cursor])
    }

    /// Records the measured completion time of the active event.
    pub fn record_measured(&mut self, elapsed_us: u32) {
        self.events[self.cursor].measured_us = Some(elapsed_us);
    }

    /// Every event in sequence order.
    #[must_use]
    pub fn events(&self) -> &[TimingEvent; EVENT_COUNT] {
        &self.events
    }
}

/// `fraction × period_us`, rounded to the nearest microsecond.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn fraction_of(fraction: f32, period_us: u32) -> u32 {
    (fraction * period_us as f32 + 0.5) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_round_trip() {
        for state in [
            TimingState::Invalid,
            TimingState::Hold,
            TimingState::Wait,
            TimingState::Spark,
        ] {
            assert_eq!(TimingState::from_raw(state.as_raw()), Some(state));
        }
        assert_eq!(TimingState::from_raw(4), None);
    }

    #[test]
    fn coil_levels_follow_state_mapping() {
        assert_eq!(TimingState::Hold.coil_level(), CoilLevel::Energized);
        assert_eq!(TimingState::Wait.coil_level(), CoilLevel::Deenergized);
        assert_eq!(TimingState::Spark.coil_level(), CoilLevel::Energized);
        assert_eq!(TimingState::Invalid.coil_level(), CoilLevel::Deenergized);
    }

    #[test]
    fn validate_rejects_broken_templates() {
        let mut template = DEFAULT_TEMPLATE;
        template.steps[2].time_fraction = 1.5;
        assert_eq!(
            template.validate(),
            Err(TemplateError::FractionOutOfRange { index: 2 })
        );

        let mut template = DEFAULT_TEMPLATE;
        template.steps[1].time_fraction = 0.99;
        assert_eq!(
            template.validate(),
            Err(TemplateError::FractionsNotMonotonic { index: 2 })
        );

        let mut template = DEFAULT_TEMPLATE;
        template.steps[3].halt_timer = false;
        assert_eq!(
            template.validate(),
            Err(TemplateError::FinalEventDoesNotHalt)
        );

        let mut template = DEFAULT_TEMPLATE;
        template.steps[0].state = TimingState::Invalid;
        assert_eq!(template.validate(), Err(TemplateError::FirstEventInvalid));
    }

    #[test]
    fn reprogram_derives_start_and_end_offsets() {
        let mut schedule = EventSchedule::new(&DEFAULT_TEMPLATE);
        schedule.reprogram(10_000);

        let starts = schedule.events().map(|event| event.start_offset_us);
        let ends = schedule.events().map(|event| event.end_offset_us);
        assert_eq!(starts, [0, 333, 9_667, 10_000]);
        assert_eq!(ends, [333, 9_667, 10_000, 10_000]);
        assert_eq!(schedule.cursor(), 0);
    }

    #[test]
    fn advance_stops_at_final_event() {
        let mut schedule = EventSchedule::new(&DEFAULT_TEMPLATE);
        schedule.reprogram(10_000);

        assert_eq!(schedule.current().state(), TimingState::Hold);
        assert_eq!(schedule.advance().map(TimingEvent::state), Some(TimingState::Wait));
        assert_eq!(schedule.advance().map(TimingEvent::state), Some(TimingState::Spark));
        assert_eq!(
            schedule.advance().map(TimingEvent::state),
            Some(TimingState::Invalid)
        );
        assert!(schedule.advance().is_none());
        assert_eq!(schedule.cursor(), EVENT_COUNT - 1);
    }

    #[test]
    fn reprogram_clears_measurements() {
        let mut schedule = EventSchedule::new(&DEFAULT_TEMPLATE);
        schedule.reprogram(10_000);
        schedule.record_measured(340);
        assert_eq!(schedule.events()[0].measured_us, Some(340));

        schedule.reprogram(9_000);
        assert!(schedule.events().iter().all(|event| event.measured_us.is_none()));
    }
}
