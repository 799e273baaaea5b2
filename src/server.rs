//! SoftDevice GATT Glue
//!
//! Registers the custom service attribute table with the SoftDevice, maps
//! raw attribute handles back to [`Attribute`]s and pushes notifications.

use defmt::{debug, info, warn, Format};
use heapless::Vec;
use nrf_softdevice::ble::gatt_server::builder::ServiceBuilder;
use nrf_softdevice::ble::gatt_server::characteristic::{Attribute as SdAttribute, Metadata, Properties};
use nrf_softdevice::ble::SecurityMode;
use nrf_softdevice::ble::gatt_server::{self, RegisterError, WriteOp};
use nrf_softdevice::ble::{Connection, Uuid};
use nrf_softdevice::Softdevice;

use ccs_audio_firmware::ble::ccs::{characteristic_uuid, Attribute, NotifySink, SERVICE_UUID, USER_DESCRIPTION_UUID};
use ccs_audio_firmware::core::protocol::{CHARACTERISTIC_VALUE_LENGTH, MAX_CACHED_VALUE};
use ccs_audio_firmware::core::transport::{CharacteristicIndex, TransportError};

/// Raw write forwarded from the SoftDevice event loop
#[derive(Format)]
pub struct GattWrite {
    pub attr: Attribute,
    pub offset: usize,
    pub data: Vec<u8, MAX_CACHED_VALUE>,
    /// Peer sent more than the cache holds
    pub truncated: bool,
}

#[derive(Clone, Copy)]
struct Handles {
    value: u16,
    cccd: u16,
    user_desc: u16,
}

pub struct CcsGattServer {
    handles: [Handles; CharacteristicIndex::COUNT],
}

impl CcsGattServer {
    /// Build the attribute table: SCP and ASCP are writable, the rest notify.
    /// Every characteristic carries a read-only user description.
    pub fn new(sd: &mut Softdevice) -> Result<Self, RegisterError> {
        let mut sb = ServiceBuilder::new(sd, Uuid::new_128(&SERVICE_UUID))?;
        let mut handles = [Handles { value: 0, cccd: 0, user_desc: 0 }; CharacteristicIndex::COUNT];

        for index in CharacteristicIndex::ALL {
            let props = if index.is_control_point() {
                Properties::new().read().write().notify()
            } else {
                Properties::new().read().notify()
            };

            let attr = SdAttribute::new(&[0u8; CHARACTERISTIC_VALUE_LENGTH][..]).variable_len(CHARACTERISTIC_VALUE_LENGTH as u16);
            let mut cb = sb.add_characteristic(Uuid::new_128(&characteristic_uuid(index)), attr, Metadata::new(props))?;
            let description = SdAttribute::new(index.user_description().as_bytes()).write_security(SecurityMode::NoAccess);
            let user_desc = cb.add_descriptor(Uuid::new_16(USER_DESCRIPTION_UUID), description)?;
            let built = cb.build();

            handles[index.as_usize()] = Handles {
                value: built.value_handle,
                cccd: built.cccd_handle,
                user_desc: user_desc.handle(),
            };
            debug!(
                "GATT: {} value_handle {}, cccd_handle {}",
                index.user_description(),
                built.value_handle,
                built.cccd_handle
            );
        }

        let service = sb.build();
        info!("GATT: custom service registered, handle {}", service.handle());
        Ok(Self { handles })
    }

    fn attribute(&self, handle: u16) -> Option<Attribute> {
        CharacteristicIndex::ALL.into_iter().find_map(|index| {
            let h = self.handles[index.as_usize()];
            if h.value == handle {
                Some(Attribute::Value(index))
            } else if h.cccd == handle {
                Some(Attribute::Cccd(index))
            } else if h.user_desc == handle {
                Some(Attribute::UserDescription(index))
            } else {
                None
            }
        })
    }

    pub fn notify(&self, conn: &Connection, index: CharacteristicIndex, data: &[u8]) -> Result<(), gatt_server::NotifyValueError> {
        gatt_server::notify_value(conn, self.handles[index.as_usize()].value, data)
    }
}

impl gatt_server::Server for CcsGattServer {
    type Event = GattWrite;

    fn on_write(&self, _conn: &Connection, handle: u16, _op: WriteOp, offset: usize, data: &[u8]) -> Option<Self::Event> {
        let Some(attr) = self.attribute(handle) else {
            debug!("GATT: write to unknown handle {}", handle);
            return None;
        };

        let take = data.len().min(MAX_CACHED_VALUE);
        let mut buf = Vec::new();
        // Cannot fail: `take` is bounded by the capacity
        let _ = buf.extend_from_slice(&data[..take]);

        Some(GattWrite {
            attr,
            offset,
            data: buf,
            truncated: take < data.len(),
        })
    }
}

/// Notification sink backed by the current SoftDevice connection
pub struct SoftdeviceSink<'a> {
    server: &'a CcsGattServer,
    conn: Option<Connection>,
}

impl<'a> SoftdeviceSink<'a> {
    pub fn new(server: &'a CcsGattServer) -> Self {
        Self { server, conn: None }
    }

    pub fn attach(&mut self, conn: Connection) {
        self.conn = Some(conn);
    }

    pub fn detach(&mut self) {
        self.conn = None;
    }
}

impl NotifySink for SoftdeviceSink<'_> {
    fn send_notification(&mut self, index: CharacteristicIndex, data: &[u8]) -> Result<(), TransportError> {
        let conn = self.conn.as_ref().ok_or(TransportError::NotConnected)?;
        self.server.notify(conn, index, data).map_err(|e| {
            warn!("GATT: notify on {} failed: {:?}", index.user_description(), defmt::Debug2Format(&e));
            TransportError::SendFailed
        })
    }
}
