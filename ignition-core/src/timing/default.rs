//! Default single-cylinder ignition sequence.
//!
//! The coil charges from the crank edge for 12° of rotation, rests until 348°,
//! is energized again for the spark window, and drops back to the fail-safe
//! state when the rotation completes.

use super::{EventStep, TimingState, TimingTemplate};

/// Crank angle (degrees) where the dwell ends.
pub const DWELL_END_DEG: f32 = 12.0;
/// Crank angle (degrees) where the spark window opens.
pub const SPARK_START_DEG: f32 = 348.0;

const DEG_PER_ROTATION: f32 = 360.0;

/// Ordered events making up one rotation.
pub const DEFAULT_STEPS: [EventStep; 4] = [
    EventStep::new(TimingState::Hold, false, 0.0),
    EventStep::new(TimingState::Wait, false, DWELL_END_DEG / DEG_PER_ROTATION),
    EventStep::new(TimingState::Spark, false, SPARK_START_DEG / DEG_PER_ROTATION),
    // Halting here leaves the coil off until the next edge reprograms the schedule.
    EventStep::new(TimingState::Invalid, true, 1.0),
];

/// Template used by the engine unless another one is supplied.
pub const DEFAULT_TEMPLATE: TimingTemplate = TimingTemplate::new(DEFAULT_STEPS);

/// Returns the shared default template.
#[must_use]
pub const fn default_template() -> TimingTemplate {
    DEFAULT_TEMPLATE
}
