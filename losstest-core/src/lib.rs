#![no_std]

// Packet-delivery-ratio test engine for BLE advertising links.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Platforms plug in through the `Radio` and `Clock`
// traits; everything else (record codec, round state machines, statistics and
// the operator console grammar) lives here.

pub mod adv;
pub mod clock;
pub mod codec;
pub mod config;
pub mod console;
pub mod engine;
pub mod phy;
pub mod radio;
pub mod stats;
pub mod status;
pub mod telemetry;
pub mod trigger;
