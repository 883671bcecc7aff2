#![allow(dead_code)]

use heapless::Vec as HeaplessVec;
use ignition_core::controller::{IgnitionController, OneShotTimer};
use ignition_core::device::{Actuator, CoilLevel};
use ignition_core::engine::{Generation, Transition};
use ignition_core::tick::ManualTickSource;

/// Coil that remembers every level it was driven to.
#[derive(Default)]
pub struct BenchCoil {
    pub levels: HeaplessVec<CoilLevel, 128>,
}

impl BenchCoil {
    pub fn last(&self) -> Option<CoilLevel> {
        self.levels.last().copied()
    }
}

impl Actuator for BenchCoil {
    fn apply(&mut self, level: CoilLevel) {
        self.levels.push(level).expect("coil log overflow");
    }
}

/// One-shot timer that holds at most one pending deadline.
#[derive(Default)]
pub struct BenchTimer {
    pub pending: Option<(u32, Generation)>,
    pub armed: HeaplessVec<u32, 128>,
    pub cancels: u32,
}

impl OneShotTimer for BenchTimer {
    fn schedule(&mut self, after_us: u32, generation: Generation) {
        self.pending = Some((after_us, generation));
        self.armed.push(after_us).expect("timer log overflow");
    }

    fn cancel(&mut self) {
        self.pending = None;
        self.cancels += 1;
    }
}

pub type Bench = IgnitionController<ManualTickSource, BenchCoil, BenchTimer>;

/// Started controller on a manual clock.
pub fn bench() -> Bench {
    let mut bench = IgnitionController::new(
        ManualTickSource::new(),
        BenchCoil::default(),
        BenchTimer::default(),
    );
    bench.start();
    bench
}

/// Advances the clock and delivers a rotation edge.
pub fn edge_after(bench: &mut Bench, micros: u64) -> Transition {
    bench.ticks_mut().advance_us(micros);
    bench.on_rotation_edge()
}

/// Advances the clock to the pending deadline and delivers its expiry.
pub fn fire_pending(bench: &mut Bench) -> Option<Transition> {
    let (after_us, generation) = bench.timer_mut().pending.take()?;
    bench.ticks_mut().advance_us(u64::from(after_us));
    Some(bench.on_timer_expired(generation))
}

/// Primes the engine and feeds enough constant rotations to fill the predictor window.
pub fn warm_up(bench: &mut Bench, period_us: u64) -> Transition {
    edge_after(bench, period_us);
    let mut last = None;
    for _ in 0..ignition_core::predictor::WINDOW {
        last = Some(edge_after(bench, period_us));
    }
    last.expect("window is never empty")
}

/// Runs pending deadlines until the chain halts.
pub fn run_to_halt(bench: &mut Bench) -> usize {
    let mut fired = 0;
    while fire_pending(bench).is_some() {
        fired += 1;
    }
    fired
}
