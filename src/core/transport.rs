//! Transport Contract
//!
//! What the dispatch engine needs from the BLE side: a connection query and
//! a notify primitive keyed by characteristic index.

use super::protocol::ProviderId;

/// Characteristics of the custom service, in attribute table order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CharacteristicIndex {
    /// Stream control point (write); also carries system responses
    Scp,
    Dmic,
    Lca,
    Rca,
    Lcf,
    Rcf,
    /// Alert control point (write)
    Ascp,
}

impl CharacteristicIndex {
    pub const COUNT: usize = 7;

    pub const ALL: [CharacteristicIndex; Self::COUNT] = [
        CharacteristicIndex::Scp,
        CharacteristicIndex::Dmic,
        CharacteristicIndex::Lca,
        CharacteristicIndex::Rca,
        CharacteristicIndex::Lcf,
        CharacteristicIndex::Rcf,
        CharacteristicIndex::Ascp,
    ];

    /// Characteristic a provider notifies on. Unknown ids fall back to the
    /// stream control point.
    pub const fn for_provider(id: ProviderId) -> Self {
        match id.bits() {
            0x01 => CharacteristicIndex::Dmic,
            0x02 => CharacteristicIndex::Lca,
            0x04 => CharacteristicIndex::Rca,
            0x08 => CharacteristicIndex::Lcf,
            0x10 => CharacteristicIndex::Rcf,
            _ => CharacteristicIndex::Scp,
        }
    }

    pub const fn as_usize(self) -> usize {
        self as usize
    }

    /// Written by the peer rather than notified
    pub const fn is_control_point(self) -> bool {
        matches!(self, CharacteristicIndex::Scp | CharacteristicIndex::Ascp)
    }

    /// Characteristic user description descriptor
    pub const fn user_description(self) -> &'static str {
        match self {
            CharacteristicIndex::Scp => "STREAM_CONTROL_POINT - Write - Start/Stop Audio/Features",
            CharacteristicIndex::Dmic => "DMIC_AUDIO - Notification",
            CharacteristicIndex::Lca => "AUDIO (Left Channel) - Notification",
            CharacteristicIndex::Rca => "AUDIO (Right Channel) - Notification",
            CharacteristicIndex::Lcf => "SOUND_FEATURES (Left Channel) - Notification",
            CharacteristicIndex::Rcf => "SOUND_FEATURES (Right Channel) - Notification",
            CharacteristicIndex::Ascp => "Request to ALERT user of direction",
        }
    }
}

/// Transport errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// No peer attached
    NotConnected,
    /// Payload empty or longer than one notification
    InvalidLength,
    /// Link layer refused the notification
    SendFailed,
}

impl TransportError {
    /// Numeric status reported to callers that expect legacy codes
    pub const fn code(self) -> u8 {
        match self {
            TransportError::NotConnected => 1,
            TransportError::InvalidLength => 2,
            TransportError::SendFailed => 3,
        }
    }
}

/// Notification channel towards the connected peer
pub trait Transport {
    fn is_connected(&self) -> bool;

    /// Cache `data` for reads and send it as one notification.
    fn notify(&mut self, data: &[u8], index: CharacteristicIndex) -> Result<(), TransportError>;

    /// Cache the whole of `data` but send at most one notification's worth.
    fn write_notify(&mut self, data: &[u8], index: CharacteristicIndex) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn notify(&mut self, data: &[u8], index: CharacteristicIndex) -> Result<(), TransportError> {
        (**self).notify(data, index)
    }

    fn write_notify(&mut self, data: &[u8], index: CharacteristicIndex) -> Result<(), TransportError> {
        (**self).write_notify(data, index)
    }
}
