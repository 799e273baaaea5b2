//! Custom Service GATT Server
//!
//! Attribute-level behaviour of the custom service: per-characteristic value
//! cache for reads, CCCD storage, user descriptions, write validation, and
//! the [`Transport`] implementation the dispatch engine notifies through.
//!
//! The radio side is abstracted by [`NotifySink`]; on target it forwards to
//! the SoftDevice, in tests it records frames.

use heapless::Vec;

use super::connection::{ConnectionError, LinkState, ServiceState};
use crate::core::protocol::{Request, CHARACTERISTIC_VALUE_LENGTH, MAX_CACHED_VALUE};
use crate::core::transport::{CharacteristicIndex, Transport, TransportError};

/// Custom service UUID, `e093f3b5-00a3-a9e5-9eca-40016e0edc24`
pub const SERVICE_UUID: [u8; 16] = [
    0x24, 0xdc, 0x0e, 0x6e, 0x01, 0x40, 0xca, 0x9e, 0xe5, 0xa9, 0xa3, 0x00, 0xb5, 0xf3, 0x93, 0xe0,
];

/// 128-bit UUID (little-endian) of a characteristic. Characteristics share
/// the service base and differ in byte 12 (position) and byte 4 (kind).
pub const fn characteristic_uuid(index: CharacteristicIndex) -> [u8; 16] {
    let mut uuid = SERVICE_UUID;
    uuid[12] = 0xb6 + index as u8;
    uuid[4] = match index {
        CharacteristicIndex::Scp => 0x02,
        CharacteristicIndex::Dmic | CharacteristicIndex::Lca | CharacteristicIndex::Rca => 0x04,
        CharacteristicIndex::Lcf | CharacteristicIndex::Rcf | CharacteristicIndex::Ascp => 0x03,
    };
    uuid
}

/// Characteristic User Description descriptor type
pub const USER_DESCRIPTION_UUID: u16 = 0x2901;

/// CCCD value with notifications enabled
pub const CCCD_NOTIFY: u16 = 0x0001;

/// Emits one notification frame on the radio.
pub trait NotifySink {
    fn send_notification(&mut self, index: CharacteristicIndex, data: &[u8]) -> Result<(), TransportError>;
}

/// Attributes of one characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Attribute {
    Value(CharacteristicIndex),
    Cccd(CharacteristicIndex),
    UserDescription(CharacteristicIndex),
}

/// ATT errors returned to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttError {
    WriteNotPermitted,
    InvalidOffset,
    InvalidAttributeValueLength,
}

impl AttError {
    /// ATT protocol error code
    pub const fn code(self) -> u8 {
        match self {
            AttError::WriteNotPermitted => 0x03,
            AttError::InvalidOffset => 0x07,
            AttError::InvalidAttributeValueLength => 0x0D,
        }
    }
}

/// Result of an accepted write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CcsEvent {
    /// Stream control point written; first byte decoded
    StreamControl(Request),
    /// Alert control point written
    Alert { len: usize },
    CccdWrite {
        index: CharacteristicIndex,
        notifications: bool,
    },
}

pub struct CcsServer<S: NotifySink> {
    link: LinkState,
    values: [Vec<u8, MAX_CACHED_VALUE>; CharacteristicIndex::COUNT],
    cccd: [[u8; 2]; CharacteristicIndex::COUNT],
    sink: S,
}

impl<S: NotifySink> CcsServer<S> {
    /// New server with notifications enabled on every characteristic.
    pub fn new(sink: S) -> Self {
        Self {
            link: LinkState::new(),
            values: Default::default(),
            cccd: [CCCD_NOTIFY.to_le_bytes(); CharacteristicIndex::COUNT],
            sink,
        }
    }

    /// Attribute table is registered with the stack
    pub fn on_registered(&mut self) {
        self.link.set_ready();
        info!("CCS: service ready");
    }

    pub fn on_connect(&mut self, handle: u16) -> Result<(), ConnectionError> {
        self.link.connect(handle)?;
        info!("CCS: connected, handle {}", handle);
        Ok(())
    }

    pub fn on_disconnect(&mut self, handle: u16, reason: Option<u8>) -> Result<(), ConnectionError> {
        self.link.disconnect(handle, reason)?;
        info!("CCS: disconnected, handle {}", handle);
        Ok(())
    }

    pub fn state(&self) -> ServiceState {
        self.link.state()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Cached value of a characteristic
    pub fn value(&self, index: CharacteristicIndex) -> &[u8] {
        &self.values[index.as_usize()]
    }

    pub fn notifications_enabled(&self, index: CharacteristicIndex) -> bool {
        u16::from_le_bytes(self.cccd[index.as_usize()]) & CCCD_NOTIFY != 0
    }

    pub fn on_read(&self, attr: Attribute) -> &[u8] {
        match attr {
            Attribute::Value(index) => self.value(index),
            Attribute::Cccd(index) => &self.cccd[index.as_usize()],
            Attribute::UserDescription(index) => index.user_description().as_bytes(),
        }
    }

    /// Validate and apply a peer write.
    pub fn on_write(&mut self, attr: Attribute, offset: usize, data: &[u8]) -> Result<CcsEvent, AttError> {
        if offset != 0 {
            warn!("CCS: write with offset {} rejected", offset);
            return Err(AttError::InvalidOffset);
        }

        match attr {
            Attribute::Cccd(index) => {
                let bytes: [u8; 2] = data.try_into().map_err(|_| AttError::InvalidAttributeValueLength)?;
                self.cccd[index.as_usize()] = bytes;
                let notifications = self.notifications_enabled(index);
                debug!("CCS: CCCD {:?} notifications {}", index, notifications);
                Ok(CcsEvent::CccdWrite { index, notifications })
            }
            Attribute::Value(index) if index.is_control_point() => {
                if data.len() > CHARACTERISTIC_VALUE_LENGTH {
                    return Err(AttError::InvalidAttributeValueLength);
                }
                let event = match index {
                    CharacteristicIndex::Scp => {
                        let first = data.first().copied().ok_or(AttError::InvalidAttributeValueLength)?;
                        CcsEvent::StreamControl(Request::from_byte(first))
                    }
                    _ => CcsEvent::Alert { len: data.len() },
                };
                self.store(index, data).map_err(|_| AttError::InvalidAttributeValueLength)?;
                Ok(event)
            }
            _ => Err(AttError::WriteNotPermitted),
        }
    }

    fn store(&mut self, index: CharacteristicIndex, data: &[u8]) -> Result<(), TransportError> {
        let slot = &mut self.values[index.as_usize()];
        slot.clear();
        slot.extend_from_slice(data).map_err(|_| TransportError::InvalidLength)
    }
}

impl<S: NotifySink> Transport for CcsServer<S> {
    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn notify(&mut self, data: &[u8], index: CharacteristicIndex) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if data.is_empty() || data.len() > CHARACTERISTIC_VALUE_LENGTH {
            return Err(TransportError::InvalidLength);
        }

        self.store(index, data)?;
        self.sink.send_notification(index, data)
    }

    fn write_notify(&mut self, data: &[u8], index: CharacteristicIndex) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if data.is_empty() || data.len() > MAX_CACHED_VALUE {
            return Err(TransportError::InvalidLength);
        }

        self.store(index, data)?;
        // Only the first frame goes out; the rest is available via read.
        let frame = &data[..data.len().min(CHARACTERISTIC_VALUE_LENGTH)];
        self.sink.send_notification(index, frame)
    }
}
