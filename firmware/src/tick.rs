//! Tick source backed by the Embassy time driver.
//!
//! The time driver runs at 1 MHz, so readings advance in whole microseconds
//! and are scaled to the engine's 100 ns tick.

use embassy_time::Instant;
use ignition_core::tick::{TICKS_PER_US, TickSource, Ticks};

pub struct EmbassyTickSource {
    epoch: Instant,
}

impl EmbassyTickSource {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl TickSource for EmbassyTickSource {
    fn now(&self) -> Ticks {
        Instant::now()
            .saturating_duration_since(self.epoch)
            .as_micros()
            .saturating_mul(TICKS_PER_US)
    }

    fn reset(&mut self) {
        self.epoch = Instant::now();
    }
}
