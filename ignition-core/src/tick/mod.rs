//! Monotonic tick counter abstraction.
//!
//! The engine works in 100 ns ticks so edge timestamps keep sub-microsecond
//! resolution, while every scheduling decision is expressed in microseconds.

/// Raw tick count (100 ns resolution).
pub type Ticks = u64;

/// Number of ticks that make up one microsecond.
pub const TICKS_PER_US: u64 = 10;

/// Converts a tick delta to whole microseconds, truncating.
#[must_use]
pub const fn ticks_to_us(ticks: Ticks) -> u64 {
    ticks / TICKS_PER_US
}

/// Converts microseconds to ticks, saturating on overflow.
#[must_use]
pub const fn us_to_ticks(us: u64) -> Ticks {
    us.saturating_mul(TICKS_PER_US)
}

/// Microseconds elapsed between `since` and `now`, clamped into `u32`.
///
/// A rebased counter (`now < since`) reports zero.
#[must_use]
pub fn elapsed_us(now: Ticks, since: Ticks) -> u32 {
    let micros = ticks_to_us(now.saturating_sub(since));
    u32::try_from(micros).unwrap_or(u32::MAX)
}

/// Monotonic counter with a fixed resolution of [`TICKS_PER_US`] per microsecond.
pub trait TickSource {
    /// Returns the current tick count.
    fn now(&self) -> Ticks;

    /// Rebases the counter so the next reading starts from zero.
    fn reset(&mut self);
}

/// Tick source advanced by hand, used by tests and the emulator.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ManualTickSource {
    now: Ticks,
}

impl ManualTickSource {
    /// Creates a source positioned at tick zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { now: 0 }
    }

    /// Moves the counter to an absolute tick value.
    pub fn set(&mut self, ticks: Ticks) {
        self.now = ticks;
    }

    /// Advances the counter by `micros` microseconds.
    pub fn advance_us(&mut self, micros: u64) {
        self.now = self.now.saturating_add(us_to_ticks(micros));
    }
}

impl TickSource for ManualTickSource {
    fn now(&self) -> Ticks {
        self.now
    }

    fn reset(&mut self) {
        self.now = 0;
    }
}
