use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_sync::signal::Signal;
use ignition_core::controller::IgnitionController;
use ignition_core::device::DispatchActuator;

use crate::coil::{CoilActuator, HighSideDrivers};
use crate::status::SnapshotSignal;
use crate::tick::EmbassyTickSource;
use crate::timer::DeadlineTimer;

mod report_task;
mod timing_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Controller wired to the board's clock, coil channel, and deadline timer.
pub(super) type FirmwareController =
    IgnitionController<EmbassyTickSource, CoilActuator<'static>, DeadlineTimer>;

pub(super) static SNAPSHOTS: SnapshotSignal = Signal::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0, EXTI0, PB3, ..
    } = hal::init(config);

    // Crank reference sensor: one rising edge per revolution. The edge is
    // stamped when the timing task wakes, so executor latency lands in the
    // measured period.
    let crank = ExtiInput::new(PA0, EXTI0, Pull::Down);
    // Coil stays off until the first accepted cycle.
    let coil = DispatchActuator::new(HighSideDrivers::new(Output::new(
        PB3,
        Level::Low,
        Speed::VeryHigh,
    )));

    let controller = FirmwareController::new(EmbassyTickSource::new(), coil, DeadlineTimer::new());

    spawner
        .spawn(timing_task::run(crank, controller, &SNAPSHOTS))
        .expect("failed to spawn timing task");

    spawner
        .spawn(report_task::run(&SNAPSHOTS))
        .expect("failed to spawn report task");

    core::future::pending::<()>().await;
}
