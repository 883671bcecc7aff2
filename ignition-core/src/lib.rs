#![no_std]

// Shared ignition timing logic.
//
// Everything here is hardware-agnostic so the same engine runs inside the
// Embassy firmware and the host-side emulator. Platform crates provide the
// tick source, coil actuator, and one-shot timer through the traits exposed
// by `tick`, `device`, and `controller`.

pub mod controller;
pub mod device;
pub mod diagnostics;
pub mod engine;
pub mod predictor;
pub mod telemetry;
pub mod tick;
pub mod timing;
