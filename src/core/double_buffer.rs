//! Sample Double Buffer
//!
//! Lock-free bridge between the capture context (interrupt or high-priority
//! executor) and the cooperative poll loop. The producer fills half A, then
//! half B, raising a "full" flag as each half completes; the consumer drains
//! a full half and clears its flag.
//!
//! # Safety Contract
//!
//! - Only ONE context may call [`push()`](DoubleBuffer::push) /
//!   [`push_slice()`](DoubleBuffer::push_slice) (the producer).
//! - Only ONE context may call [`drain()`](DoubleBuffer::drain) and
//!   [`configure()`](DoubleBuffer::configure) (the consumer).
//! - `configure()` must only run while the producer is stopped.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Raw capture sample that can be narrowed to a 16-bit transmit word.
pub trait Sample: Copy + Send {
    const ZERO: Self;

    /// Truncating conversion to the on-air word
    fn to_word(self) -> u16;
}

impl Sample for i16 {
    const ZERO: Self = 0;

    fn to_word(self) -> u16 {
        self as u16
    }
}

impl Sample for i32 {
    const ZERO: Self = 0;

    fn to_word(self) -> u16 {
        self as i16 as u16
    }
}

impl Sample for u32 {
    const ZERO: Self = 0;

    fn to_word(self) -> u16 {
        self as u16
    }
}

/// One of the two halves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Half {
    A,
    B,
}

impl Half {
    pub const BOTH: [Half; 2] = [Half::A, Half::B];

    const fn index(self) -> usize {
        match self {
            Half::A => 0,
            Half::B => 1,
        }
    }
}

/// Two `N`-sample halves with an active block length `len <= N`.
pub struct DoubleBuffer<S, const N: usize> {
    halves: [UnsafeCell<[S; N]>; 2],
    full: [AtomicBool; 2],
    /// Active block length (consumer-owned, producer reads).
    len: AtomicUsize,
    /// Write position in `0..2 * len` (producer-owned).
    write_pos: AtomicUsize,
    /// Samples dropped because the target half was not drained yet.
    overruns: AtomicUsize,
}

// SAFETY: S: Send because samples cross from the capture context to the
// poll loop. A half is written only while its flag is clear and read only
// while it is set; the flag store (Release) / load (Acquire) pair orders
// the sample writes before the reads and the reads before the next writes.
unsafe impl<S: Send, const N: usize> Sync for DoubleBuffer<S, N> {}
unsafe impl<S: Send, const N: usize> Send for DoubleBuffer<S, N> {}

impl<S: Sample, const N: usize> Default for DoubleBuffer<S, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Sample, const N: usize> DoubleBuffer<S, N> {
    /// Create an empty buffer with block length `N`.
    pub const fn new() -> Self {
        assert!(N >= 1, "double buffer halves must hold at least one sample");

        Self {
            halves: [UnsafeCell::new([S::ZERO; N]), UnsafeCell::new([S::ZERO; N])],
            full: [AtomicBool::new(false), AtomicBool::new(false)],
            len: AtomicUsize::new(N),
            write_pos: AtomicUsize::new(0),
            overruns: AtomicUsize::new(0),
        }
    }

    /// Set the block length (clamped to `1..=N`) and discard pending data.
    pub fn configure(&self, len: usize) {
        let len = len.clamp(1, N);
        self.len.store(len, Ordering::Relaxed);
        self.write_pos.store(0, Ordering::Relaxed);
        self.full[0].store(false, Ordering::Release);
        self.full[1].store(false, Ordering::Release);
    }

    pub fn block_len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Producer side. Returns `false` and counts an overrun if the target
    /// half still waits for the consumer.
    pub fn push(&self, sample: S) -> bool {
        let len = self.len.load(Ordering::Relaxed);
        let mut pos = self.write_pos.load(Ordering::Relaxed);
        if pos >= 2 * len {
            pos = 0;
        }

        let half = if pos < len { 0 } else { 1 };
        if self.full[half].load(Ordering::Acquire) {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        // SAFETY: sole producer, and the flag is clear so the consumer is not
        // reading this half.
        unsafe {
            let slot = &mut *self.halves[half].get();
            slot[pos - half * len] = sample;
        }

        let mut next = pos + 1;
        if next == len {
            self.full[0].store(true, Ordering::Release);
        } else if next == 2 * len {
            self.full[1].store(true, Ordering::Release);
            next = 0;
        }
        self.write_pos.store(next, Ordering::Relaxed);
        true
    }

    /// Push every sample; returns how many were accepted.
    pub fn push_slice(&self, samples: &[S]) -> usize {
        samples.iter().filter(|s| self.push(**s)).count()
    }

    pub fn is_full(&self, half: Half) -> bool {
        self.full[half.index()].load(Ordering::Acquire)
    }

    /// A half is waiting for the consumer.
    pub fn has_pending(&self) -> bool {
        Half::BOTH.iter().any(|h| self.is_full(*h))
    }

    /// Consumer side. Hands a full half to `f`, then releases it to the
    /// producer. `None` if the half is not full.
    pub fn drain<R>(&self, half: Half, f: impl FnOnce(&[S]) -> R) -> Option<R> {
        let i = half.index();
        if !self.full[i].load(Ordering::Acquire) {
            return None;
        }

        let len = self.len.load(Ordering::Relaxed);
        // SAFETY: the flag is set, so the producer does not touch this half
        // until it is cleared below.
        let block = unsafe { &(&*self.halves[i].get())[..len] };
        let result = f(block);

        self.full[i].store(false, Ordering::Release);
        Some(result)
    }

    pub fn overruns(&self) -> usize {
        self.overruns.load(Ordering::Relaxed)
    }
}
