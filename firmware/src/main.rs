#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
extern crate panic_halt;

mod status;
mod telemetry;

#[cfg(target_os = "none")]
mod coil;
#[cfg(target_os = "none")]
mod runtime;
#[cfg(target_os = "none")]
mod tick;
#[cfg(target_os = "none")]
mod timer;

#[cfg(not(target_os = "none"))]
fn main() {}
