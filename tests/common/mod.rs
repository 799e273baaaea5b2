//! Common test utilities for the host test suite
//!
//! - Recording notification sink
//! - Scripted providers with a shared call log
//! - Fake capture paths and a manual clock

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ccs_audio_firmware::ble::ccs::{CcsServer, NotifySink};
use ccs_audio_firmware::core::protocol::{ProviderId, Request, ResponsePacket};
use ccs_audio_firmware::core::transport::{CharacteristicIndex, Transport, TransportError};
use ccs_audio_firmware::providers::{
    CapturePath, Clock, PollHandler, PowerHandler, Provider, ProviderError, Reply, Session,
};
use ccs_audio_firmware::core::protocol::PowerMode;

/// Notification sink that records every frame
#[derive(Default)]
pub struct RecordingSink {
    pub frames: Vec<(CharacteristicIndex, Vec<u8>)>,
    /// Next sends fail with `SendFailed`
    pub fail: bool,
}

impl NotifySink for RecordingSink {
    fn send_notification(&mut self, index: CharacteristicIndex, data: &[u8]) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::SendFailed);
        }
        self.frames.push((index, data.to_vec()));
        Ok(())
    }
}

impl RecordingSink {
    pub fn frames_on(&self, index: CharacteristicIndex) -> Vec<Vec<u8>> {
        self.frames
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, d)| d.clone())
            .collect()
    }
}

/// A connected CCS server backed by a recording sink
pub fn connected_server() -> CcsServer<RecordingSink> {
    let mut server = CcsServer::new(RecordingSink::default());
    server.on_registered();
    server.on_connect(1).unwrap();
    server
}

/// Shared, ordered log of provider invocations
pub type CallLog = Rc<RefCell<Vec<Call>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Request(u8, Request),
    Power(u8, PowerMode),
    Poll(u8),
}

pub fn call_log() -> CallLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// Provider whose answers are scripted by the test
pub struct ScriptedProvider {
    pub id: ProviderId,
    pub reply: Result<Reply, ProviderError>,
    /// Words written into the response packet on every request
    pub response: Vec<u16>,
    pub with_power: bool,
    pub with_poll: bool,
    pub power_result: Result<(), ProviderError>,
    /// Payload sent on every poll
    pub poll_payload: Vec<u8>,
    pub session: Session,
    pub log: CallLog,
}

impl ScriptedProvider {
    pub fn new(id: ProviderId, log: &CallLog) -> Self {
        Self {
            id,
            reply: Ok(Reply::Immediate),
            response: Vec::new(),
            with_power: true,
            with_poll: true,
            power_result: Ok(()),
            poll_payload: vec![0xAA, 0x55],
            session: Session::new(),
            log: Rc::clone(log),
        }
    }

    pub fn replying(mut self, reply: Result<Reply, ProviderError>) -> Self {
        self.reply = reply;
        self
    }
}

impl Provider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn session_token(&self) -> Request {
        self.session.token()
    }

    fn on_request(&mut self, request: Request, response: &mut ResponsePacket) -> Result<Reply, ProviderError> {
        self.log.borrow_mut().push(Call::Request(self.id.bits(), request));
        self.session.record(request);
        for (slot, word) in response.words_mut().iter_mut().zip(&self.response) {
            *slot = *word;
        }
        self.reply
    }

    fn power_handler(&mut self) -> Option<&mut dyn PowerHandler> {
        if self.with_power {
            Some(self)
        } else {
            None
        }
    }

    fn poll_handler(&mut self) -> Option<&mut dyn PollHandler> {
        if self.with_poll {
            Some(self)
        } else {
            None
        }
    }
}

impl PowerHandler for ScriptedProvider {
    fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), ProviderError> {
        self.log.borrow_mut().push(Call::Power(self.id.bits(), mode));
        self.power_result
    }
}

impl PollHandler for ScriptedProvider {
    fn poll(&mut self, transport: &mut dyn Transport) {
        self.log.borrow_mut().push(Call::Poll(self.id.bits()));
        let _ = transport.notify(&self.poll_payload, CharacteristicIndex::for_provider(self.id));
    }
}

/// Capture path that counts transitions
#[derive(Clone, Default)]
pub struct FakeCapture {
    pub enabled: Rc<Cell<bool>>,
    pub enables: Rc<Cell<u32>>,
    pub disables: Rc<Cell<u32>>,
}

impl CapturePath for FakeCapture {
    fn enable(&mut self) {
        self.enabled.set(true);
        self.enables.set(self.enables.get() + 1);
    }

    fn disable(&mut self) {
        self.enabled.set(false);
        self.disables.set(self.disables.get() + 1);
    }
}

/// Clock the test advances by hand
#[derive(Clone, Default)]
pub struct ManualClock {
    pub now: Rc<Cell<u32>>,
}

impl ManualClock {
    pub fn at(ms: u32) -> Self {
        Self {
            now: Rc::new(Cell::new(ms)),
        }
    }

    pub fn set(&self, ms: u32) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.get()
    }
}

/// Decode a 20-byte packet into little-endian words
pub fn words(bytes: &[u8]) -> Vec<u16> {
    bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect()
}
