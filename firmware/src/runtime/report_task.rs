use crate::status::SnapshotSignal;
use crate::telemetry;

#[embassy_executor::task]
pub async fn run(snapshots: &'static SnapshotSignal) -> ! {
    loop {
        let snapshot = snapshots.wait().await;
        telemetry::log_snapshot(&snapshot);
    }
}
