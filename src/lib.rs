#![cfg_attr(not(test), no_std)]

//! CCS Audio Streaming Firmware Library
//!
//! Request/response dispatch for the Custom Service (CS) that streams
//! microphone audio and sound features over BLE notifications.
//!
//! - `core`: wire protocol, sample double buffer, transport contract
//! - `ble`: GATT side of the custom service (value cache, CCCDs, link state)
//! - `cs`: provider registry, request router and poll scheduler
//! - `providers`: audio and sound-feature sources

#[macro_use]
mod fmt;

pub mod ble;
pub mod core;
pub mod cs;
pub mod providers;
