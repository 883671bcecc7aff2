//! Device dispatch contract and the coil actuator built on top of it.
//!
//! Peripherals on the ECU are addressed by a 16-bit device id and driven with
//! bounded request/response payloads. The ignition engine only needs one of
//! them (the high-side driver feeding the coil), but it speaks the same
//! convention so the firmware can route coil commands through whatever
//! dispatch table the board provides.

use core::fmt;

/// Identifier used to address a device through [`DeviceDispatch`].
pub type DeviceId = u16;

/// Maximum payload carried by a single request or response.
pub const MAX_PAYLOAD: usize = 8;

/// First 12 V high-side driver channel; wired to the ignition coil.
pub const COIL_DRIVER_ID: DeviceId = 0x0010;

/// Device id answering timing diagnostics queries.
pub const TIMING_DEVICE_ID: DeviceId = 0x0016;

/// Bounded request/response payload exchanged with a device.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DataField {
    len: u8,
    data: [u8; MAX_PAYLOAD],
}

impl DataField {
    /// Zero-length payload.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            len: 0,
            data: [0; MAX_PAYLOAD],
        }
    }

    /// Single-byte payload.
    #[must_use]
    pub const fn byte(value: u8) -> Self {
        let mut data = [0; MAX_PAYLOAD];
        data[0] = value;
        Self { len: 1, data }
    }

    /// Copies `bytes` into a payload, returning `None` when it exceeds [`MAX_PAYLOAD`].
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MAX_PAYLOAD {
            return None;
        }
        let mut data = [0; MAX_PAYLOAD];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            len: u8::try_from(bytes.len()).ok()?,
            data,
        })
    }

    /// Number of meaningful bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns `true` for a zero-length payload.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Meaningful bytes of the payload.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// First byte, if present.
    #[must_use]
    pub fn first(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }
}

impl fmt::Display for DataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (index, byte) in self.as_slice().iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        f.write_str("]")
    }
}

/// Synchronous, bounded-latency device command interface.
///
/// Implementations must answer an unknown id with [`DataField::empty`] rather
/// than failing; callers run in interrupt context and have nowhere to report
/// an error.
pub trait DeviceDispatch {
    fn ioctl(&mut self, id: DeviceId, request: &DataField) -> DataField;
}

/// Dispatch table with no devices attached.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopDispatch;

impl DeviceDispatch for NoopDispatch {
    fn ioctl(&mut self, _: DeviceId, _: &DataField) -> DataField {
        DataField::empty()
    }
}

/// Electrical state requested for the ignition coil.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CoilLevel {
    Energized,
    Deenergized,
}

impl CoilLevel {
    /// Returns `true` when current flows through the primary winding.
    #[must_use]
    pub const fn is_energized(self) -> bool {
        matches!(self, CoilLevel::Energized)
    }
}

impl fmt::Display for CoilLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoilLevel::Energized => f.write_str("on"),
            CoilLevel::Deenergized => f.write_str("off"),
        }
    }
}

/// Drives the ignition coil. Called from interrupt context; must not block.
pub trait Actuator {
    fn apply(&mut self, level: CoilLevel);
}

/// Actuator that forwards coil commands to a high-side driver via [`DeviceDispatch`].
#[derive(Clone, Debug)]
pub struct DispatchActuator<D> {
    dispatch: D,
    device: DeviceId,
}

impl<D: DeviceDispatch> DispatchActuator<D> {
    /// Drives the default coil channel ([`COIL_DRIVER_ID`]).
    pub const fn new(dispatch: D) -> Self {
        Self::with_device(dispatch, COIL_DRIVER_ID)
    }

    /// Drives an explicit high-side driver channel.
    pub const fn with_device(dispatch: D, device: DeviceId) -> Self {
        Self { dispatch, device }
    }

    /// Provides access to the wrapped dispatch table.
    pub fn dispatch(&self) -> &D {
        &self.dispatch
    }

    /// Provides mutable access to the wrapped dispatch table.
    pub fn dispatch_mut(&mut self) -> &mut D {
        &mut self.dispatch
    }
}

impl<D: DeviceDispatch> Actuator for DispatchActuator<D> {
    fn apply(&mut self, level: CoilLevel) {
        let command = DataField::byte(u8::from(level.is_energized()));
        // The driver acknowledges with a single byte that carries no information.
        let _ = self.dispatch.ioctl(self.device, &command);
    }
}
