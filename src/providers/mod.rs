//! Providers
//!
//! A provider is one capability unit answering to a single bit of the
//! request mask. It must handle requests and may expose a power handler and
//! a poll handler.

pub mod audio;
pub mod features;

use crate::core::double_buffer::DoubleBuffer;
use crate::core::protocol::{PowerMode, ProviderId, Request, ResponsePacket, StreamMode, RESPONSE_WORDS};
use crate::core::transport::Transport;

pub use audio::AudioProvider;
pub use features::{FeatureProvider, SoundFeatures};

/// Capture buffer sized for one release-mode packet per half
pub type AudioBuffer<S> = DoubleBuffer<S, RESPONSE_WORDS>;

/// How a provider answered a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reply {
    /// Send the response packet now
    Immediate,
    /// Accepted; data follows through polling
    Deferred,
}

/// Provider errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProviderError {
    Failed,
}

impl ProviderError {
    pub const fn code(self) -> u8 {
        match self {
            ProviderError::Failed => 1,
        }
    }
}

pub trait PowerHandler {
    fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), ProviderError>;
}

pub trait PollHandler {
    /// Flush whatever data is ready. Must not block.
    fn poll(&mut self, transport: &mut dyn Transport);
}

pub trait Provider {
    fn id(&self) -> ProviderId;

    /// Last request byte this provider accepted
    fn session_token(&self) -> Request;

    fn on_request(&mut self, request: Request, response: &mut ResponsePacket) -> Result<Reply, ProviderError>;

    fn power_handler(&mut self) -> Option<&mut dyn PowerHandler> {
        None
    }

    fn poll_handler(&mut self) -> Option<&mut dyn PollHandler> {
        None
    }
}

/// Millisecond time source for timestamps and request timing
pub trait Clock {
    fn now_ms(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

/// Physical capture path behind a provider (PDM, SAADC channel, ...)
pub trait CapturePath {
    fn enable(&mut self);
    fn disable(&mut self);

    fn configure(&mut self, _mode: StreamMode) {}
}

/// Session token bookkeeping shared by the streaming providers
#[derive(Debug, Clone, Copy)]
pub struct Session {
    token: Request,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub const fn new() -> Self {
        Self { token: Request::IDLE }
    }

    pub fn record(&mut self, request: Request) {
        self.token = request;
    }

    pub fn token(&self) -> Request {
        self.token
    }

    pub fn is_active(&self) -> bool {
        self.token.is_start()
    }

    pub fn mode(&self) -> StreamMode {
        self.token.op_code().mode()
    }

    /// Debug-mode timestamp word, ms modulo 2^16
    pub fn timestamp<C: Clock>(&self, clock: &C) -> Option<u16> {
        self.mode()
            .has_timestamp()
            .then(|| (clock.now_ms() & 0xFFFF) as u16)
    }
}
