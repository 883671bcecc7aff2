//! Read-only timing diagnostics served on [`TIMING_DEVICE_ID`](crate::device::TIMING_DEVICE_ID).
//!
//! The first request byte selects a [`DiagnosticCommand`]; the response is
//! the requested value in little-endian order.

use core::fmt;

use crate::device::DataField;
use crate::engine::EngineState;

/// Query selector carried in the first request byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiagnosticCommand {
    /// Engine speed estimate (`u32`).
    GetRpm,
    /// Tick of the last rotation edge (`u64`).
    GetTick,
    /// Last measured rotation period in µs (`u32`).
    GetPeriod,
    /// Current timing state code (`u32`).
    GetState,
}

impl DiagnosticCommand {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            DiagnosticCommand::GetRpm => 0,
            DiagnosticCommand::GetTick => 1,
            DiagnosticCommand::GetPeriod => 2,
            DiagnosticCommand::GetState => 3,
        }
    }

    /// Single-byte request selecting this command.
    #[must_use]
    pub const fn request(self) -> DataField {
        DataField::byte(self.code())
    }
}

impl TryFrom<u8> for DiagnosticCommand {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(DiagnosticCommand::GetRpm),
            1 => Ok(DiagnosticCommand::GetTick),
            2 => Ok(DiagnosticCommand::GetPeriod),
            3 => Ok(DiagnosticCommand::GetState),
            other => Err(other),
        }
    }
}

impl fmt::Display for DiagnosticCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticCommand::GetRpm => f.write_str("rpm"),
            DiagnosticCommand::GetTick => f.write_str("tick"),
            DiagnosticCommand::GetPeriod => f.write_str("period"),
            DiagnosticCommand::GetState => f.write_str("state"),
        }
    }
}

/// Answers a diagnostics request from the live engine state.
///
/// Returns `None` before the engine is started, for an empty request, and for
/// an unknown command byte.
#[must_use]
pub fn respond(state: &EngineState, request: &DataField) -> Option<DataField> {
    if !state.initialized {
        return None;
    }
    let command = DiagnosticCommand::try_from(request.first()?).ok()?;

    match command {
        DiagnosticCommand::GetRpm => DataField::from_slice(&state.rpm_estimate.to_le_bytes()),
        DiagnosticCommand::GetTick => {
            let tick = state.last_edge_tick.unwrap_or_default();
            DataField::from_slice(&tick.to_le_bytes())
        }
        DiagnosticCommand::GetPeriod => {
            DataField::from_slice(&state.last_period_us.to_le_bytes())
        }
        DiagnosticCommand::GetState => {
            DataField::from_slice(&state.current_state.as_raw().to_le_bytes())
        }
    }
}

/// Decodes a 4-byte little-endian response.
#[must_use]
pub fn decode_u32(response: &DataField) -> Option<u32> {
    let bytes: [u8; 4] = response.as_slice().try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Decodes an 8-byte little-endian response.
#[must_use]
pub fn decode_u64(response: &DataField) -> Option<u64> {
    let bytes: [u8; 8] = response.as_slice().try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}
