use embassy_futures::select::{Either3, select3};
use embassy_stm32::exti::ExtiInput;
use embassy_time::{Duration, Ticker};

use super::FirmwareController;
use crate::status::{self, SnapshotSignal};
use crate::telemetry;
use crate::timer;

/// Cadence of the predictor staleness check.
const HOUSEKEEPING_PERIOD: Duration = Duration::from_millis(100);
/// Housekeeping passes between published snapshots (one per second).
const REPORT_EVERY: u32 = 10;

/// Multiplexes the crank edge, the sub-event deadline, and housekeeping so
/// the three handlers never nest.
#[embassy_executor::task]
pub async fn run(
    mut crank: ExtiInput<'static>,
    mut controller: FirmwareController,
    snapshots: &'static SnapshotSignal,
) -> ! {
    let mut housekeeping = Ticker::every(HOUSEKEEPING_PERIOD);
    let mut passes: u32 = 0;

    let started = controller.start();
    telemetry::log_transition(&started);

    loop {
        let pending = controller.timer().pending();
        match select3(
            crank.wait_for_rising_edge(),
            timer::expired(pending),
            housekeeping.next(),
        )
        .await
        {
            Either3::First(()) => {
                let transition = controller.on_rotation_edge();
                telemetry::log_transition(&transition);
            }
            Either3::Second(generation) => {
                let transition = controller.on_timer_expired(generation);
                telemetry::log_transition(&transition);
            }
            Either3::Third(()) => {
                if controller.on_housekeeping() {
                    telemetry::log_predictor_reset();
                }
                status::record(
                    controller.engine().state(),
                    controller.telemetry().counters(),
                );
                passes = passes.wrapping_add(1);
                if passes % REPORT_EVERY == 0 {
                    snapshots.signal(status::snapshot());
                }
            }
        }
    }
}
