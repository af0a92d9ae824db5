//! Hardware-independent core library for canary
//!
//! This crate contains all platform-agnostic logic for the canary CO2 sensor
//! node: the retained record store, boot classification, the sleep/power state
//! machine, the network session manager, the sensor facade and the cycle
//! driver that ties them together.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod boot;
pub mod config;
pub mod device;
pub mod display;
pub mod fields;
pub mod network;
pub mod node;
pub mod power;
pub mod retained;
pub mod settings;

#[cfg(test)]
pub(crate) mod testing;
