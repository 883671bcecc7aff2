//! High-side driver outputs addressed through the device dispatch table.

use embassy_stm32::gpio::Output;
use ignition_core::device::{
    COIL_DRIVER_ID, DataField, DeviceDispatch, DeviceId, DispatchActuator,
};

/// 12 V high-side channels. Only the coil channel is populated on this board.
pub struct HighSideDrivers<'d> {
    coil: Output<'d>,
}

impl<'d> HighSideDrivers<'d> {
    pub fn new(coil: Output<'d>) -> Self {
        Self { coil }
    }
}

impl DeviceDispatch for HighSideDrivers<'_> {
    fn ioctl(&mut self, id: DeviceId, request: &DataField) -> DataField {
        if id != COIL_DRIVER_ID {
            return DataField::empty();
        }
        match request.first() {
            Some(0) => self.coil.set_low(),
            Some(_) => self.coil.set_high(),
            None => return DataField::empty(),
        }
        DataField::byte(u8::from(self.coil.is_set_high()))
    }
}

pub type CoilActuator<'d> = DispatchActuator<HighSideDrivers<'d>>;
