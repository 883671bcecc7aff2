//! One-shot deadline for the sub-event chain.
//!
//! The timing task owns the controller, so instead of a hardware compare
//! interrupt the pending deadline is stored here and awaited alongside the
//! crank edge with `select3`.

use embassy_time::{Duration, Instant, Timer};
use ignition_core::controller::OneShotTimer;
use ignition_core::engine::Generation;

pub struct DeadlineTimer {
    pending: Option<(Instant, Generation)>,
}

impl DeadlineTimer {
    pub const fn new() -> Self {
        Self { pending: None }
    }

    /// Deadline and generation of the armed event, if any.
    pub fn pending(&self) -> Option<(Instant, Generation)> {
        self.pending
    }
}

impl OneShotTimer for DeadlineTimer {
    fn schedule(&mut self, after_us: u32, generation: Generation) {
        let at = Instant::now() + Duration::from_micros(u64::from(after_us));
        self.pending = Some((at, generation));
    }

    fn cancel(&mut self) {
        self.pending = None;
    }
}

/// Resolves with the generation once `pending` is due; never resolves when idle.
pub async fn expired(pending: Option<(Instant, Generation)>) -> Generation {
    match pending {
        Some((at, generation)) => {
            Timer::at(at).await;
            generation
        }
        None => core::future::pending().await,
    }
}
