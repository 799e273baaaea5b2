//! Audio Streaming Provider
//!
//! Streams raw capture blocks (DMIC, left/right channel) as 20-byte packets.
//! A start request arms the capture path and defers the reply; data then
//! flows through polling until a stop request arrives.

use super::{AudioBuffer, CapturePath, Clock, PollHandler, PowerHandler, Provider, ProviderError, Reply, Session};
use crate::core::double_buffer::{Half, Sample};
use crate::core::protocol::{PowerMode, ProviderId, Request, ResponsePacket};
use crate::core::transport::{CharacteristicIndex, Transport};

pub struct AudioProvider<'a, S: Sample, P: CapturePath, C: Clock> {
    id: ProviderId,
    name: &'static str,
    index: CharacteristicIndex,
    buffer: &'a AudioBuffer<S>,
    capture: P,
    clock: C,
    session: Session,
    capturing: bool,
    tx: ResponsePacket,
}

impl<'a, S: Sample, P: CapturePath, C: Clock> AudioProvider<'a, S, P, C> {
    pub fn new(id: ProviderId, name: &'static str, buffer: &'a AudioBuffer<S>, capture: P, clock: C) -> Self {
        Self {
            id,
            name,
            index: CharacteristicIndex::for_provider(id),
            buffer,
            capture,
            clock,
            session: Session::new(),
            capturing: false,
            tx: ResponsePacket::new(),
        }
    }

    pub fn dmic(buffer: &'a AudioBuffer<S>, capture: P, clock: C) -> Self {
        Self::new(ProviderId::DMIC, "DMIC", buffer, capture, clock)
    }

    pub fn left_channel(buffer: &'a AudioBuffer<S>, capture: P, clock: C) -> Self {
        Self::new(ProviderId::LCA, "LCA", buffer, capture, clock)
    }

    pub fn right_channel(buffer: &'a AudioBuffer<S>, capture: P, clock: C) -> Self {
        Self::new(ProviderId::RCA, "RCA", buffer, capture, clock)
    }

    fn set_capture(&mut self, on: bool) {
        if on == self.capturing {
            return;
        }
        if on {
            self.capture.enable();
        } else {
            self.capture.disable();
        }
        self.capturing = on;
    }
}

impl<S: Sample, P: CapturePath, C: Clock> Provider for AudioProvider<'_, S, P, C> {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn session_token(&self) -> Request {
        self.session.token()
    }

    fn on_request(&mut self, request: Request, response: &mut ResponsePacket) -> Result<Reply, ProviderError> {
        if request.is_start() {
            let mode = request.op_code().mode();

            // Producer must be idle while the block length changes
            self.set_capture(false);
            self.buffer.configure(mode.samples_per_packet());
            self.capture.configure(mode);
            self.session.record(request);
            self.set_capture(true);

            info!("{}: start {:?}, {} samples/packet", self.name, mode, mode.samples_per_packet());
            Ok(Reply::Deferred)
        } else {
            self.session.record(request);
            self.set_capture(false);
            response.clear();

            info!("{}: stop", self.name);
            Ok(Reply::Immediate)
        }
    }

    fn power_handler(&mut self) -> Option<&mut dyn PowerHandler> {
        Some(self)
    }

    fn poll_handler(&mut self) -> Option<&mut dyn PollHandler> {
        Some(self)
    }
}

impl<S: Sample, P: CapturePath, C: Clock> PowerHandler for AudioProvider<'_, S, P, C> {
    fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), ProviderError> {
        match mode {
            // A broadcast wake never restarts a stopped stream
            PowerMode::Normal if self.session.is_active() => self.set_capture(true),
            PowerMode::Normal => {}
            PowerMode::Sleep => self.set_capture(false),
        }
        debug!("{}: power {:?}, capturing {}", self.name, mode, self.capturing);
        Ok(())
    }
}

impl<S: Sample, P: CapturePath, C: Clock> PollHandler for AudioProvider<'_, S, P, C> {
    fn poll(&mut self, transport: &mut dyn Transport) {
        for half in Half::BOTH {
            if !self.buffer.is_full(half) {
                continue;
            }

            let timestamp = self.session.timestamp(&self.clock);
            let tx = &mut self.tx;
            let packed = self
                .buffer
                .drain(half, |block| tx.pack(timestamp, block.iter().map(|s| s.to_word())));

            if packed.is_some() {
                if let Err(e) = transport.notify(&self.tx.to_le_bytes(), self.index) {
                    warn!("{}: notify {:?} failed: {:?}", self.name, half, e);
                }
            }
        }
    }
}
