//! BLE side of the custom service
//!
//! Link state and the GATT attribute behaviour of the custom service. The
//! SoftDevice glue that drives these lives in the firmware binary.

pub mod ccs;
pub mod connection;
