mod common;

use common::{bench, edge_after, fire_pending, warm_up};
use ignition_core::device::CoilLevel;
use ignition_core::engine::{
    Engine, EngineInput, RejectReason, Schedule, TimingConfig, TransitionNote,
};
use ignition_core::predictor::{INSUFFICIENT_DATA_PERIOD_US, PredictorConfig, SampleVerdict};
use ignition_core::timing::{DEFAULT_TEMPLATE, TemplateError, TimingState};

#[test]
fn edges_before_start_do_nothing() {
    let mut engine = Engine::new();
    let transition = engine.advance(EngineInput::EdgeFired { now: 1_000 });
    assert_eq!(transition.note, TransitionNote::NotStarted);
    assert_eq!(transition.actuate, None);
    assert_eq!(transition.schedule, Schedule::Idle);
}

#[test]
fn priming_edge_forces_invalid() {
    let mut bench = bench();
    let primed = edge_after(&mut bench, 5_000);

    assert_eq!(primed.note, TransitionNote::Primed);
    assert_eq!(primed.actuate, Some(TimingState::Invalid));
    assert_eq!(bench.engine().state().last_period_us, 0);
    assert!(bench.engine().predictor().is_empty());
}

#[test]
fn implausibly_long_period_is_rejected() {
    let mut bench = bench();
    warm_up(&mut bench, 10_000);
    // Drop the in-flight cycle; the engine is now sitting in HOLD.
    bench.timer_mut().pending = None;

    let rejected = edge_after(&mut bench, 200_000);
    assert!(matches!(
        rejected.note,
        TransitionNote::CycleRejected {
            period_us: 200_000,
            reason: RejectReason::ForecastDiverged,
            sample: SampleVerdict::Rejected { streak: 1 },
            ..
        }
    ));
    assert_eq!(rejected.actuate, Some(TimingState::Invalid));
    assert_eq!(rejected.schedule, Schedule::Cancel);
    assert_eq!(bench.actuator().last(), Some(CoilLevel::Deenergized));
    assert_eq!(bench.timer().pending, None);
    assert!(fire_pending(&mut bench).is_none());
    assert_eq!(bench.engine().state().current_state, TimingState::Invalid);
}

#[test]
fn rejected_outlier_recovers_on_next_steady_edge() {
    let mut bench = bench();
    warm_up(&mut bench, 10_000);
    bench.timer_mut().pending = None;
    edge_after(&mut bench, 200_000);

    let recovered = edge_after(&mut bench, 10_000);
    assert!(matches!(
        recovered.note,
        TransitionNote::CycleAccepted {
            sample: SampleVerdict::Accepted,
            ..
        }
    ));
    assert_eq!(bench.engine().predictor().invalid_streak(), 0);
    assert_eq!(bench.timer().pending.map(|(after, _)| after), Some(333));
}

#[test]
fn over_speed_is_rejected_as_too_short() {
    let mut bench = bench();
    let last = warm_up(&mut bench, 4_600);

    assert!(matches!(
        last.note,
        TransitionNote::CycleRejected {
            period_us: 4_600,
            forecast_us: 4_600,
            reason: RejectReason::PeriodTooShort,
            ..
        }
    ));
    assert_eq!(bench.timer().armed.len(), 0);
}

#[test]
fn partial_window_reports_sentinel_forecast() {
    let mut bench = bench();
    edge_after(&mut bench, 10_000);
    let transition = edge_after(&mut bench, 10_000);

    assert!(matches!(
        transition.note,
        TransitionNote::CycleRejected {
            forecast_us: INSUFFICIENT_DATA_PERIOD_US,
            reason: RejectReason::ForecastOutOfRange,
            ..
        }
    ));
}

#[test]
fn persistent_noise_resets_predictor() {
    let mut bench = bench();
    warm_up(&mut bench, 10_000);
    bench.timer_mut().pending = None;

    for _ in 0..9 {
        edge_after(&mut bench, 40_000);
    }
    assert_eq!(bench.engine().predictor().invalid_streak(), 9);

    let reset = edge_after(&mut bench, 40_000);
    assert!(matches!(
        reset.note,
        TransitionNote::CycleRejected {
            sample: SampleVerdict::Reset,
            ..
        }
    ));
    assert!(bench.engine().predictor().is_empty());
    assert_eq!(bench.telemetry().counters().predictor_resets, 1);
}

#[test]
fn housekeeping_drops_stale_history_after_silence() {
    let mut bench = bench();
    warm_up(&mut bench, 10_000);
    bench.timer_mut().pending = None;

    bench.ticks_mut().advance_us(100_000);
    assert!(!bench.on_housekeeping());
    assert!(bench.engine().predictor().is_full());

    bench.ticks_mut().advance_us(30_000);
    assert!(bench.on_housekeeping());
    assert!(bench.engine().predictor().is_empty());

    // The engine restarts its warm-up with the next edge.
    let next = edge_after(&mut bench, 10_000);
    assert!(matches!(
        next.note,
        TransitionNote::CycleRejected {
            reason: RejectReason::ForecastOutOfRange,
            ..
        }
    ));
}

#[test]
fn engine_rejects_template_without_terminal_halt() {
    let mut template = DEFAULT_TEMPLATE;
    template.steps[3].halt_timer = false;

    let result = Engine::with_template(
        &template,
        TimingConfig::default(),
        PredictorConfig::default(),
    );
    assert!(matches!(result, Err(TemplateError::FinalEventDoesNotHalt)));
}

#[test]
fn custom_bounds_change_acceptance() {
    let config = TimingConfig::new(2_000, 120_000, 0.2);
    let mut engine = Engine::with_template(&DEFAULT_TEMPLATE, config, PredictorConfig::default())
        .expect("default template is valid");
    engine.start(0);

    let mut now = 0;
    engine.advance(EngineInput::EdgeFired { now });
    let mut last = None;
    for _ in 0..5 {
        now += 46_000;
        last = Some(engine.advance(EngineInput::EdgeFired { now }));
    }
    let last = last.expect("edges delivered");
    assert!(matches!(last.note, TransitionNote::CycleAccepted { .. }));
    assert_eq!(
        last.schedule,
        Schedule::Arm {
            after_us: 153,
            generation: engine.state().generation
        }
    );
}
