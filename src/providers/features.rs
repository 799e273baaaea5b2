//! Sound Feature Provider
//!
//! Left/right channel feature streams. Each captured block is reduced to a
//! handful of level statistics instead of being sent raw.

use super::{CapturePath, Clock, PollHandler, PowerHandler, Provider, ProviderError, Reply, Session};
use crate::core::double_buffer::{DoubleBuffer, Half, Sample};
use crate::core::protocol::{PowerMode, ProviderId, Request, ResponsePacket};
use crate::core::transport::{CharacteristicIndex, Transport};

/// Statistics of one capture block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SoundFeatures {
    /// Largest absolute sample
    pub peak: u16,
    /// Root mean square, in sample units
    pub rms: u16,
    pub mean: i16,
    /// Sign changes between consecutive samples
    pub zero_crossings: u16,
}

impl SoundFeatures {
    pub const WORDS: usize = 4;

    pub fn from_block<S: Sample>(block: &[S]) -> Self {
        if block.is_empty() {
            return Self::default();
        }

        let mut peak = 0u16;
        let mut sum = 0i64;
        let mut sum_sq = 0u64;
        let mut zero_crossings = 0u16;
        let mut prev_negative: Option<bool> = None;

        for sample in block {
            let s = sample.to_word() as i16;
            peak = peak.max(s.unsigned_abs());
            sum += s as i64;
            sum_sq += (s as i64 * s as i64) as u64;

            let negative = s < 0;
            if prev_negative.is_some_and(|p| p != negative) {
                zero_crossings = zero_crossings.saturating_add(1);
            }
            prev_negative = Some(negative);
        }

        let n = block.len() as f32;
        let rms = libm::sqrtf(sum_sq as f32 / n);

        Self {
            peak,
            rms: rms.min(u16::MAX as f32) as u16,
            mean: (sum / block.len() as i64) as i16,
            zero_crossings,
        }
    }

    pub fn words(&self) -> [u16; Self::WORDS] {
        [self.peak, self.rms, self.mean as u16, self.zero_crossings]
    }
}

pub struct FeatureProvider<'a, S: Sample, P: CapturePath, C: Clock, const N: usize> {
    id: ProviderId,
    name: &'static str,
    index: CharacteristicIndex,
    buffer: &'a DoubleBuffer<S, N>,
    capture: P,
    clock: C,
    session: Session,
    capturing: bool,
    last: SoundFeatures,
    tx: ResponsePacket,
}

impl<'a, S: Sample, P: CapturePath, C: Clock, const N: usize> FeatureProvider<'a, S, P, C, N> {
    pub fn new(id: ProviderId, name: &'static str, buffer: &'a DoubleBuffer<S, N>, capture: P, clock: C) -> Self {
        Self {
            id,
            name,
            index: CharacteristicIndex::for_provider(id),
            buffer,
            capture,
            clock,
            session: Session::new(),
            capturing: false,
            last: SoundFeatures::default(),
            tx: ResponsePacket::new(),
        }
    }

    pub fn left_channel(buffer: &'a DoubleBuffer<S, N>, capture: P, clock: C) -> Self {
        Self::new(ProviderId::LCF, "LCF", buffer, capture, clock)
    }

    pub fn right_channel(buffer: &'a DoubleBuffer<S, N>, capture: P, clock: C) -> Self {
        Self::new(ProviderId::RCF, "RCF", buffer, capture, clock)
    }

    /// Features of the most recently drained block
    pub fn last_features(&self) -> SoundFeatures {
        self.last
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

impl<S: Sample, P: CapturePath, C: Clock, const N: usize> Provider for FeatureProvider<'_, S, P, C, N> {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn session_token(&self) -> Request {
        self.session.token()
    }

    fn on_request(&mut self, request: Request, response: &mut ResponsePacket) -> Result<Reply, ProviderError> {
        if request.is_start() {
            let mode = request.op_code().mode();
            self.set_capture(false);
            self.buffer.configure(N);
            self.capture.configure(mode);
            self.session.record(request);
            self.set_capture(true);

            info!("{}: start {:?}, {} samples/block", self.name, mode, N);
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

impl<S: Sample, P: CapturePath, C: Clock, const N: usize> PowerHandler for FeatureProvider<'_, S, P, C, N> {
    fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), ProviderError> {
        match mode {
            PowerMode::Normal if self.session.is_active() => self.set_capture(true),
            PowerMode::Normal => {}
            PowerMode::Sleep => self.set_capture(false),
        }
        debug!("{}: power {:?}", self.name, mode);
        Ok(())
    }
}

impl<S: Sample, P: CapturePath, C: Clock, const N: usize> PollHandler for FeatureProvider<'_, S, P, C, N> {
    fn poll(&mut self, transport: &mut dyn Transport) {
        for half in Half::BOTH {
            let Some(features) = self.buffer.drain(half, |block| SoundFeatures::from_block(block)) else {
                continue;
            };
            self.last = features;

            let timestamp = self.session.timestamp(&self.clock);
            let used = self.tx.pack(timestamp, features.words());
            let bytes = self.tx.to_le_bytes();

            if let Err(e) = transport.notify(&bytes[..used * 2], self.index) {
                warn!("{}: notify {:?} failed: {:?}", self.name, half, e);
            }
        }
    }
}
