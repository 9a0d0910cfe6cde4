#![no_std]

// Shared logic for the PIX vending terminal.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Collaborators (gateway, display, actuator, button) are
// reached through traits so the firmware and emulator supply their own I/O.

pub mod clock;
pub mod console;
pub mod controller;
pub mod gateway;
pub mod gesture;
pub mod session;
pub mod telemetry;
