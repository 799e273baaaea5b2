//! Core infrastructure: wire protocol, capture buffers and the transport
//! contract shared by the dispatch engine and the BLE layer.

pub mod double_buffer;
pub mod protocol;
pub mod transport;
