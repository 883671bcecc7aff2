//! Timing telemetry shared by firmware and host targets.
//!
//! The core crate does not log. Instead every engine transition can be
//! folded into a fixed-size [`TelemetryRecorder`] ring with compact numeric
//! event codes, plus running counters the firmware exposes to its reporting
//! task and the emulator prints on `status`.

use core::fmt;

use heapless::HistoryBuf;

use crate::engine::{Generation, RejectReason, Transition, TransitionNote};
use crate::tick::Ticks;
use crate::timing::TimingState;

/// Sequential identifier assigned to each record.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimingEventKind {
    EngineStarted,
    EdgePrimed,
    CycleAccepted,
    CycleRejected(RejectReason),
    EventEntered(TimingState),
    SequenceHalted,
    StaleTimer,
    SpuriousTimer,
    PredictorReset,
    Custom(u16),
}

impl fmt::Display for TimingEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingEventKind::EngineStarted => f.write_str("engine-started"),
            TimingEventKind::EdgePrimed => f.write_str("edge-primed"),
            TimingEventKind::CycleAccepted => f.write_str("cycle-accepted"),
            TimingEventKind::CycleRejected(reason) => write!(f, "cycle-rejected {reason}"),
            TimingEventKind::EventEntered(state) => write!(f, "event-entered {state}"),
            TimingEventKind::SequenceHalted => f.write_str("sequence-halted"),
            TimingEventKind::StaleTimer => f.write_str("stale-timer"),
            TimingEventKind::SpuriousTimer => f.write_str("spurious-timer"),
            TimingEventKind::PredictorReset => f.write_str("predictor-reset"),
            TimingEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TimingEventKind {
    const ENGINE_STARTED_CODE: u16 = 0x0000;
    const EDGE_PRIMED_CODE: u16 = 0x0001;
    const CYCLE_ACCEPTED_CODE: u16 = 0x0002;
    const SEQUENCE_HALTED_CODE: u16 = 0x0003;
    const STALE_TIMER_CODE: u16 = 0x0004;
    const SPURIOUS_TIMER_CODE: u16 = 0x0005;
    const PREDICTOR_RESET_CODE: u16 = 0x0006;
    const CYCLE_REJECTED_BASE: u16 = 0x0010;
    const EVENT_ENTERED_BASE: u16 = 0x0020;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TimingEventKind::EngineStarted => Self::ENGINE_STARTED_CODE,
            TimingEventKind::EdgePrimed => Self::EDGE_PRIMED_CODE,
            TimingEventKind::CycleAccepted => Self::CYCLE_ACCEPTED_CODE,
            TimingEventKind::SequenceHalted => Self::SEQUENCE_HALTED_CODE,
            TimingEventKind::StaleTimer => Self::STALE_TIMER_CODE,
            TimingEventKind::SpuriousTimer => Self::SPURIOUS_TIMER_CODE,
            TimingEventKind::PredictorReset => Self::PREDICTOR_RESET_CODE,
            TimingEventKind::CycleRejected(reason) => {
                Self::CYCLE_REJECTED_BASE + reason_index(reason)
            }
            #[allow(clippy::cast_possible_truncation)]
            TimingEventKind::EventEntered(state) => {
                Self::EVENT_ENTERED_BASE + state.as_raw() as u16
            }
            TimingEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TimingEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::ENGINE_STARTED_CODE => TimingEventKind::EngineStarted,
            Self::EDGE_PRIMED_CODE => TimingEventKind::EdgePrimed,
            Self::CYCLE_ACCEPTED_CODE => TimingEventKind::CycleAccepted,
            Self::SEQUENCE_HALTED_CODE => TimingEventKind::SequenceHalted,
            Self::STALE_TIMER_CODE => TimingEventKind::StaleTimer,
            Self::SPURIOUS_TIMER_CODE => TimingEventKind::SpuriousTimer,
            Self::PREDICTOR_RESET_CODE => TimingEventKind::PredictorReset,
            value if (Self::CYCLE_REJECTED_BASE..Self::EVENT_ENTERED_BASE).contains(&value) => {
                reason_from_index(value - Self::CYCLE_REJECTED_BASE)
                    .map_or(TimingEventKind::Custom(value), TimingEventKind::CycleRejected)
            }
            value if (Self::EVENT_ENTERED_BASE..Self::EVENT_ENTERED_BASE + 4).contains(&value) => {
                TimingState::from_raw(u32::from(value - Self::EVENT_ENTERED_BASE))
                    .map_or(TimingEventKind::Custom(value), TimingEventKind::EventEntered)
            }
            other => TimingEventKind::Custom(other),
        }
    }
}

const fn reason_index(reason: RejectReason) -> u16 {
    match reason {
        RejectReason::PeriodTooShort => 0,
        RejectReason::ForecastOutOfRange => 1,
        RejectReason::ForecastDiverged => 2,
    }
}

fn reason_from_index(index: u16) -> Option<RejectReason> {
    match index {
        0 => Some(RejectReason::PeriodTooShort),
        1 => Some(RejectReason::ForecastOutOfRange),
        2 => Some(RejectReason::ForecastDiverged),
        _ => None,
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    /// Measurement and forecast of a rotation.
    Cycle(CycleTelemetry),
    /// Elapsed time since the edge when a sub-event began.
    Event { elapsed_us: u32 },
    /// Generation carried by a discarded timer expiry.
    Timer { generation: Generation },
}

/// Rotation measurement payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CycleTelemetry {
    pub period_us: u32,
    pub forecast_us: u32,
}

impl CycleTelemetry {
    #[must_use]
    pub const fn new(period_us: u32, forecast_us: u32) -> Self {
        Self {
            period_us,
            forecast_us,
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp: Ticks,
    pub event: TimingEventKind,
    pub details: TelemetryPayload,
}

/// Running totals kept alongside the ring.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TelemetryCounters {
    pub accepted: u32,
    pub rejected: u32,
    pub predictor_resets: u32,
    pub stale_timers: u32,
    pub spurious_timers: u32,
}

impl TelemetryCounters {
    pub const fn new() -> Self {
        Self {
            accepted: 0,
            rejected: 0,
            predictor_resets: 0,
            stale_timers: 0,
            spurious_timers: 0,
        }
    }
}

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord, CAPACITY>,
    counters: TelemetryCounters,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            counters: TelemetryCounters::new(),
            next_event_id: 0,
        }
    }

    /// Recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.ring.oldest_ordered()
    }

    /// Most recent record, if any.
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub const fn counters(&self) -> &TelemetryCounters {
        &self.counters
    }

    /// Folds an engine transition into the ring and counters.
    ///
    /// Inputs that arrived before the engine started leave no record.
    pub fn record_transition(
        &mut self,
        transition: &Transition,
        timestamp: Ticks,
    ) -> Option<EventId> {
        let (event, details) = match transition.note {
            TransitionNote::NotStarted => return None,
            TransitionNote::Spurious => {
                self.counters.spurious_timers = self.counters.spurious_timers.saturating_add(1);
                (TimingEventKind::SpuriousTimer, TelemetryPayload::None)
            }
            TransitionNote::Started => (TimingEventKind::EngineStarted, TelemetryPayload::None),
            TransitionNote::Primed => (TimingEventKind::EdgePrimed, TelemetryPayload::None),
            TransitionNote::CycleAccepted {
                period_us,
                forecast_us,
                ..
            } => {
                self.counters.accepted = self.counters.accepted.saturating_add(1);
                (
                    TimingEventKind::CycleAccepted,
                    TelemetryPayload::Cycle(CycleTelemetry::new(period_us, forecast_us)),
                )
            }
            TransitionNote::CycleRejected {
                period_us,
                forecast_us,
                reason,
                ..
            } => {
                self.counters.rejected = self.counters.rejected.saturating_add(1);
                (
                    TimingEventKind::CycleRejected(reason),
                    TelemetryPayload::Cycle(CycleTelemetry::new(period_us, forecast_us)),
                )
            }
            TransitionNote::Advanced { state, elapsed_us } => (
                TimingEventKind::EventEntered(state),
                TelemetryPayload::Event { elapsed_us },
            ),
            TransitionNote::Halted { elapsed_us, .. } => (
                TimingEventKind::SequenceHalted,
                TelemetryPayload::Event { elapsed_us },
            ),
            TransitionNote::StaleTimer { generation } => {
                self.counters.stale_timers = self.counters.stale_timers.saturating_add(1);
                (
                    TimingEventKind::StaleTimer,
                    TelemetryPayload::Timer { generation },
                )
            }
        };
        Some(self.record(event, details, timestamp))
    }

    /// Records a hard reset of the period predictor.
    pub fn record_predictor_reset(&mut self, timestamp: Ticks) -> EventId {
        self.counters.predictor_resets = self.counters.predictor_resets.saturating_add(1);
        self.record(
            TimingEventKind::PredictorReset,
            TelemetryPayload::None,
            timestamp,
        )
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TimingEventKind,
        details: TelemetryPayload,
        timestamp: Ticks,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details,
        });

        id
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Schedule;
    use crate::predictor::SampleVerdict;

    fn transition(note: TransitionNote) -> Transition {
        Transition {
            actuate: None,
            schedule: Schedule::Idle,
            note,
        }
    }

    #[test]
    fn event_codes_round_trip() {
        let fixtures = [
            TimingEventKind::EngineStarted,
            TimingEventKind::EdgePrimed,
            TimingEventKind::CycleAccepted,
            TimingEventKind::CycleRejected(RejectReason::PeriodTooShort),
            TimingEventKind::CycleRejected(RejectReason::ForecastDiverged),
            TimingEventKind::EventEntered(TimingState::Spark),
            TimingEventKind::SequenceHalted,
            TimingEventKind::StaleTimer,
            TimingEventKind::SpuriousTimer,
            TimingEventKind::PredictorReset,
        ];
        for kind in fixtures {
            assert_eq!(TimingEventKind::from_raw(kind.to_raw()), kind);
        }

        assert_eq!(
            TimingEventKind::from_raw(0x0013),
            TimingEventKind::Custom(0x0013)
        );
        assert_eq!(TimingEventKind::Custom(0x0BAD).to_raw(), 0x0BAD);
    }

    #[test]
    fn counters_follow_transition_notes() {
        let mut recorder = TelemetryRecorder::<8>::new();
        recorder.record_transition(
            &transition(TransitionNote::CycleAccepted {
                period_us: 10_000,
                forecast_us: 10_010,
                sample: SampleVerdict::Accepted,
            }),
            100,
        );
        recorder.record_transition(
            &transition(TransitionNote::CycleRejected {
                period_us: 200_000,
                forecast_us: 10_000,
                sample: SampleVerdict::Rejected { streak: 1 },
                reason: RejectReason::ForecastDiverged,
            }),
            200,
        );
        recorder.record_transition(&transition(TransitionNote::StaleTimer { generation: 3 }), 300);
        recorder.record_predictor_reset(400);

        assert_eq!(
            recorder.record_transition(&transition(TransitionNote::NotStarted), 500),
            None
        );

        let counters = recorder.counters();
        assert_eq!(counters.accepted, 1);
        assert_eq!(counters.rejected, 1);
        assert_eq!(counters.stale_timers, 1);
        assert_eq!(counters.predictor_resets, 1);

        let latest = recorder.latest().copied().expect("record");
        assert_eq!(latest.id, 3);
        assert_eq!(latest.event, TimingEventKind::PredictorReset);
    }

    #[test]
    fn accepted_cycle_carries_measurements() {
        let mut recorder = TelemetryRecorder::<8>::new();
        recorder.record_transition(
            &transition(TransitionNote::CycleAccepted {
                period_us: 9_000,
                forecast_us: 8_900,
                sample: SampleVerdict::Accepted,
            }),
            50,
        );

        let record = recorder.latest().copied().expect("record");
        assert_eq!(record.timestamp, 50);
        match record.details {
            TelemetryPayload::Cycle(cycle) => {
                assert_eq!(cycle.period_us, 9_000);
                assert_eq!(cycle.forecast_us, 8_900);
            }
            other => panic!("expected cycle payload, got {other:?}"),
        }
    }

    #[test]
    fn ring_keeps_most_recent_records() {
        let mut recorder = TelemetryRecorder::<4>::new();
        for tick in 0..6 {
            recorder.record(TimingEventKind::Custom(0x100), TelemetryPayload::None, tick);
        }

        assert_eq!(recorder.len(), 4);
        let timestamps: heapless::Vec<Ticks, 4> =
            recorder.oldest_first().map(|record| record.timestamp).collect();
        assert_eq!(timestamps.as_slice(), &[2, 3, 4, 5]);
    }
}
