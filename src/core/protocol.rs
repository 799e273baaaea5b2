//! CS Wire Protocol
//!
//! Single-byte request encoding, provider identities and the fixed-size
//! response packet that is pushed to the peer as notifications.
//!
//! Request byte layout:
//!
//! ```text
//!   bit  7      6..5      4..0
//!      [rsvd][op_code][provider mask]
//! ```

use core::fmt::Write;

use heapless::String;

/// Notification / characteristic value payload capacity in bytes
pub const CHARACTERISTIC_VALUE_LENGTH: usize = 20;

/// Number of 16-bit words in a response packet
pub const RESPONSE_WORDS: usize = CHARACTERISTIC_VALUE_LENGTH / 2;

/// Registry capacity (one slot per addressable provider bit)
pub const MAX_PROVIDERS: usize = 5;

/// Size of the per-characteristic read-back cache
pub const MAX_CACHED_VALUE: usize = 64;

pub const PROVIDER_MASK: u8 = 0b0001_1111;
pub const OP_CODE_SHIFT: u8 = 5;
pub const OP_CODE_MASK: u8 = 0b11;
pub const RESERVED_SHIFT: u8 = 7;

/// Decoded view of a request byte. Immutable, consumed synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Request(u8);

impl Request {
    /// Stop request with an empty mask; the session token of a provider that
    /// has never been addressed.
    pub const IDLE: Request = Request(0);

    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub const fn new(provider_mask: u8, op: OpCode) -> Self {
        Self(((op.0 & OP_CODE_MASK) << OP_CODE_SHIFT) | (provider_mask & PROVIDER_MASK))
    }

    pub const fn to_byte(self) -> u8 {
        self.0
    }

    /// Bitmask of the providers addressed by this request
    pub const fn provider_mask(self) -> u8 {
        self.0 & PROVIDER_MASK
    }

    pub const fn op_code(self) -> OpCode {
        OpCode((self.0 >> OP_CODE_SHIFT) & OP_CODE_MASK)
    }

    pub const fn reserved(self) -> bool {
        (self.0 >> RESERVED_SHIFT) & 1 == 1
    }

    pub const fn is_start(self) -> bool {
        self.op_code().is_start()
    }

    pub const fn addresses(self, id: ProviderId) -> bool {
        id.matches(self.provider_mask())
    }
}

/// Two-bit operation code. Bit 1 selects start/stop, bit 0 debug/release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OpCode(u8);

impl OpCode {
    pub const STOP: OpCode = OpCode(0b00);
    pub const START_RELEASE: OpCode = OpCode(0b10);
    pub const START_DEBUG: OpCode = OpCode(0b11);

    const START_BIT: u8 = 0b10;
    const DEBUG_BIT: u8 = 0b01;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & OP_CODE_MASK)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_start(self) -> bool {
        self.0 & Self::START_BIT != 0
    }

    pub const fn is_debug(self) -> bool {
        self.0 & Self::DEBUG_BIT != 0
    }

    /// Streaming mode selected by a start op code
    pub const fn mode(self) -> StreamMode {
        if self.is_debug() {
            StreamMode::Debug
        } else {
            StreamMode::Release
        }
    }
}

/// Packing mode of an active stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamMode {
    /// Ten samples per packet
    Release,
    /// Timestamp word followed by nine samples
    Debug,
}

impl StreamMode {
    pub const fn samples_per_packet(self) -> usize {
        match self {
            StreamMode::Release => RESPONSE_WORDS,
            StreamMode::Debug => RESPONSE_WORDS - 1,
        }
    }

    pub const fn has_timestamp(self) -> bool {
        matches!(self, StreamMode::Debug)
    }
}

/// Provider identity: exactly one bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProviderId(u8);

impl ProviderId {
    pub const DMIC: ProviderId = ProviderId(0b0000_0001);
    pub const LCA: ProviderId = ProviderId(0b0000_0010);
    pub const RCA: ProviderId = ProviderId(0b0000_0100);
    pub const LCF: ProviderId = ProviderId(0b0000_1000);
    pub const RCF: ProviderId = ProviderId(0b0001_0000);
    /// System pseudo-provider; outside the request mask, never routable.
    pub const SYSTEM: ProviderId = ProviderId(0b1000_0000);

    /// Returns `None` unless exactly one bit is set.
    pub const fn new(bits: u8) -> Option<Self> {
        if bits.count_ones() == 1 {
            Some(Self(bits))
        } else {
            None
        }
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn matches(self, mask: u8) -> bool {
        self.0 & mask != 0
    }

    /// True if a request byte can address this id
    pub const fn is_addressable(self) -> bool {
        self.0 & !PROVIDER_MASK == 0
    }
}

/// Power state requested of a provider's capture path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerMode {
    Normal,
    Sleep,
}

/// Reason carried in an error payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorReason {
    UnknownError,
    UnknownProvider,
}

impl ErrorReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorReason::UnknownError => "UNK_ERROR",
            ErrorReason::UnknownProvider => "UNK_PROV",
        }
    }
}

pub type ErrorPayload = String<CHARACTERISTIC_VALUE_LENGTH>;

/// Builds `"<tag>/e/<REASON>"`. The longest form, `"255/e/UNK_ERROR"`,
/// fits in a single notification.
pub fn error_payload(tag: u8, reason: ErrorReason) -> ErrorPayload {
    let mut payload = ErrorPayload::new();
    // Cannot overflow: 3 digits + "/e/" + 9 chars
    let _ = write!(payload, "{}/e/{}", tag, reason.as_str());
    payload
}

/// Fixed-size response / stream packet of 16-bit little-endian words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponsePacket {
    words: [u16; RESPONSE_WORDS],
}

impl Default for ResponsePacket {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponsePacket {
    pub const fn new() -> Self {
        Self {
            words: [0; RESPONSE_WORDS],
        }
    }

    pub fn clear(&mut self) {
        self.words = [0; RESPONSE_WORDS];
    }

    pub fn words(&self) -> &[u16; RESPONSE_WORDS] {
        &self.words
    }

    pub fn words_mut(&mut self) -> &mut [u16; RESPONSE_WORDS] {
        &mut self.words
    }

    /// Clears the packet, writes the optional timestamp word and then as
    /// many samples as fit. Returns the number of words used.
    pub fn pack<I>(&mut self, timestamp: Option<u16>, samples: I) -> usize
    where
        I: IntoIterator<Item = u16>,
    {
        self.clear();
        let mut used = 0;
        if let Some(ts) = timestamp {
            self.words[0] = ts;
            used = 1;
        }
        for (slot, word) in self.words[used..].iter_mut().zip(samples) {
            *slot = word;
            used += 1;
        }
        used
    }

    pub fn to_le_bytes(&self) -> [u8; CHARACTERISTIC_VALUE_LENGTH] {
        let mut out = [0u8; CHARACTERISTIC_VALUE_LENGTH];
        for (chunk, word) in out.chunks_exact_mut(2).zip(self.words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }
}
