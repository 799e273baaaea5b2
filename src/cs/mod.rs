//! Custom Service Dispatch
//!
//! Routes single-byte requests to registered providers, drives their poll
//! handlers once per main-loop tick and broadcasts power transitions.
//!
//! Everything here runs in the cooperative main-loop context. Capture
//! contexts only touch the providers' double buffers.

pub mod registry;

use crate::ble::ccs::{Attribute, AttError, CcsEvent, CcsServer, NotifySink};
use crate::core::protocol::{
    error_payload, ErrorReason, PowerMode, ProviderId, Request, ResponsePacket, CHARACTERISTIC_VALUE_LENGTH,
    MAX_PROVIDERS,
};
use crate::core::transport::{CharacteristicIndex, Transport, TransportError};
use crate::providers::{Clock, Provider, ProviderError, Reply};

pub use registry::{ProviderRegistry, RegistryError};

/// Dispatch errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CsError {
    Registry(RegistryError),
    /// No registered provider intersects the request mask
    UnknownProvider { mask: u8 },
    /// A matching provider failed; later matches were skipped
    ProviderFailed { provider: ProviderId, error: ProviderError },
    Transport(TransportError),
    /// Injected payload longer than one notification or than its source
    ResponseTooLong,
    Att(AttError),
}

impl From<RegistryError> for CsError {
    fn from(err: RegistryError) -> Self {
        CsError::Registry(err)
    }
}

impl From<TransportError> for CsError {
    fn from(err: TransportError) -> Self {
        CsError::Transport(err)
    }
}

impl From<AttError> for CsError {
    fn from(err: AttError) -> Self {
        CsError::Att(err)
    }
}

pub struct CustomService<'a, T: Transport, C: Clock, const N: usize = MAX_PROVIDERS> {
    registry: ProviderRegistry<'a, N>,
    transport: T,
    clock: C,
    response: ResponsePacket,
}

impl<'a, T: Transport, C: Clock, const N: usize> CustomService<'a, T, C, N> {
    pub fn new(transport: T, clock: C) -> Self {
        info!("CS: init, {} provider slots", N);
        Self {
            registry: ProviderRegistry::new(),
            transport,
            clock,
            response: ResponsePacket::new(),
        }
    }

    pub fn register_provider(&mut self, provider: &'a mut dyn Provider) -> Result<(), CsError> {
        let id = provider.id();
        match self.registry.register(provider) {
            Ok(()) => {
                info!("CS: registered provider {} ({} of {})", id.bits(), self.registry.len(), N);
                Ok(())
            }
            Err(e) => {
                error!("CS: provider {} rejected: {:?}", id.bits(), e);
                Err(e.into())
            }
        }
    }

    pub fn provider_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &ProviderRegistry<'a, N> {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Offer `request` to every provider whose id intersects its mask, in
    /// registration order.
    pub fn process_request(&mut self, request: Request) -> Result<(), CsError> {
        let mask = request.provider_mask();
        let mut providers_found = false;
        debug!("CS: request {:#x} mask {:#x}", request.to_byte(), mask);

        for provider in self.registry.iter_mut() {
            let id = provider.id();
            if !id.matches(mask) {
                continue;
            }
            providers_found = true;

            let index = CharacteristicIndex::for_provider(id);
            let started = self.clock.now_ms();
            self.response.clear();

            match provider.on_request(request, &mut self.response) {
                Ok(Reply::Immediate) => {
                    self.transport.notify(&self.response.to_le_bytes(), index)?;
                    debug!(
                        "CS: provider {} replied in {} ms",
                        id.bits(),
                        self.clock.now_ms().wrapping_sub(started)
                    );
                }
                Ok(Reply::Deferred) => {
                    debug!("CS: provider {} deferred", id.bits());
                }
                Err(error) => {
                    error!("CS: provider {} failed: {:?} (code {})", id.bits(), error, error.code());
                    let payload = error_payload(id.bits(), ErrorReason::UnknownError);
                    if let Err(e) = self.transport.notify(payload.as_bytes(), index) {
                        warn!("CS: error report for {} not sent: {:?}", id.bits(), e);
                    }
                    return Err(CsError::ProviderFailed { provider: id, error });
                }
            }
        }

        if !providers_found {
            warn!("CS: no provider for mask {:#x}", mask);
            let payload = error_payload(mask, ErrorReason::UnknownProvider);
            if let Err(e) = self.transport.notify(payload.as_bytes(), CharacteristicIndex::Scp) {
                warn!("CS: error report not sent: {:?}", e);
            }
            return Err(CsError::UnknownProvider { mask });
        }

        Ok(())
    }

    /// One scheduler tick: poll every provider with an active session.
    pub fn poll_providers(&mut self) {
        for provider in self.registry.iter_mut() {
            if !provider.session_token().is_start() {
                continue;
            }
            if let Some(handler) = provider.poll_handler() {
                handler.poll(&mut self.transport);
            }
        }
    }

    /// Broadcast a power transition. Failures are logged, not returned.
    pub fn set_power_mode(&mut self, mode: PowerMode) {
        info!("CS: power mode {:?}", mode);
        for provider in self.registry.iter_mut() {
            let id = provider.id();
            if let Some(handler) = provider.power_handler() {
                if let Err(e) = handler.set_power_mode(mode) {
                    warn!("CS: provider {} power {:?} failed: {:?}", id.bits(), mode, e);
                }
            }
        }
    }

    /// Send `len` bytes of `words` (little-endian) on `provider`'s
    /// characteristic.
    pub fn inject_response(&mut self, words: &[u16], provider: ProviderId, len: usize) -> Result<(), CsError> {
        if len > CHARACTERISTIC_VALUE_LENGTH || len > words.len() * 2 {
            error!("CS: injected response of {} bytes rejected", len);
            return Err(CsError::ResponseTooLong);
        }

        let mut bytes = [0u8; CHARACTERISTIC_VALUE_LENGTH];
        for (chunk, word) in bytes.chunks_exact_mut(2).zip(words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }

        self.transport
            .notify(&bytes[..len], CharacteristicIndex::for_provider(provider))?;
        Ok(())
    }
}

impl<'a, S: NotifySink, C: Clock, const N: usize> CustomService<'a, CcsServer<S>, C, N> {
    /// Apply a peer write; a stream control point write is dispatched as a
    /// request.
    pub fn on_gatt_write(&mut self, attr: Attribute, offset: usize, data: &[u8]) -> Result<CcsEvent, CsError> {
        let event = self.transport.on_write(attr, offset, data)?;
        if let CcsEvent::StreamControl(request) = event {
            self.process_request(request)?;
        }
        Ok(event)
    }

    /// Link dropped: stop drawing power on every capture path.
    pub fn on_disconnect(&mut self, handle: u16, reason: Option<u8>) {
        if let Err(e) = self.transport.on_disconnect(handle, reason) {
            warn!("CS: disconnect of {} ignored: {:?}", handle, e);
        }
        self.set_power_mode(PowerMode::Sleep);
    }
}
