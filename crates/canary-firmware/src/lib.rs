//! ESP32-S3 implementations of the canary-core collaborator traits.
//!
//! Everything hardware-specific lives here: the RTC-RAM arena, reset-cause
//! mapping, the SCD41/SHT40/battery sensors, Wi-Fi, the rust-mqtt client,
//! SNTP, the status panel and power control. `bin/main.rs` wires them into a
//! [`canary_core::node::Node`].

#![no_std]

extern crate alloc;

pub mod board;
pub mod clock;
pub mod i2c_bus;
pub mod mqtt;
pub mod panel;
pub mod power;
pub mod reset;
pub mod retained;
pub mod secrets;
pub mod sensors;
pub mod sntp;
pub mod wifi;
