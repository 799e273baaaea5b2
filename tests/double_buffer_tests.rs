//! Producer/consumer behaviour of the sample double buffer

use ccs_audio_firmware::core::double_buffer::{DoubleBuffer, Half};
use ccs_audio_firmware::core::protocol::StreamMode;
use ccs_audio_firmware::providers::AudioBuffer;
use proptest::prelude::*;

#[test]
fn test_overrun_drops_and_counts() {
    let buf: DoubleBuffer<i16, 4> = DoubleBuffer::new();
    buf.configure(2);

    assert_eq!(buf.push_slice(&[1, 2, 3, 4]), 4);
    assert!(buf.is_full(Half::A) && buf.is_full(Half::B));

    // Both halves pending: new samples are lost
    assert!(!buf.push(5));
    assert_eq!(buf.overruns(), 1);

    assert_eq!(buf.drain(Half::A, |b| b.to_vec()), Some(vec![1, 2]));
    assert!(buf.push(6));
    assert!(buf.push(7));
    assert_eq!(buf.drain(Half::B, |b| b.to_vec()), Some(vec![3, 4]));
    assert_eq!(buf.drain(Half::A, |b| b.to_vec()), Some(vec![6, 7]));
}

#[test]
fn test_capture_blocks_sized_to_half_never_overrun() {
    for mode in [StreamMode::Release, StreamMode::Debug] {
        let buf: AudioBuffer<i32> = DoubleBuffer::new();
        let block_len = mode.samples_per_packet();
        buf.configure(block_len);
        let block: Vec<i32> = (0..block_len as i32).collect();

        // Producer delivers one block per half, consumer drains between blocks
        for round in 0..6 {
            assert!(!buf.has_pending());
            assert_eq!(buf.push_slice(&block), block_len);
            assert!(buf.has_pending());

            let half = if round % 2 == 0 { Half::A } else { Half::B };
            assert_eq!(buf.drain(half, |b| b.len()), Some(block_len));
        }
        assert_eq!(buf.overruns(), 0);
    }
}

#[test]
fn test_block_larger_than_both_halves_overruns() {
    let buf: AudioBuffer<i32> = DoubleBuffer::new();
    buf.configure(StreamMode::Release.samples_per_packet());

    let block = [0i32; 64];
    assert_eq!(buf.push_slice(&block), 20);
    assert_eq!(buf.overruns(), 44);
}

#[test]
fn test_configure_discards_pending() {
    let buf: DoubleBuffer<i16, 10> = DoubleBuffer::new();
    buf.push_slice(&[1; 10]);
    assert!(buf.is_full(Half::A));

    buf.configure(9);
    assert!(!buf.is_full(Half::A));
    assert_eq!(buf.block_len(), 9);

    buf.configure(0);
    assert_eq!(buf.block_len(), 1);
    buf.configure(100);
    assert_eq!(buf.block_len(), 10);
}

#[test]
fn test_drain_empty_half() {
    let buf: DoubleBuffer<u32, 3> = DoubleBuffer::new();
    buf.push(1);
    assert_eq!(buf.drain(Half::A, |b| b.len()), None);
    assert_eq!(buf.drain(Half::B, |b| b.len()), None);
}

#[test]
fn test_cross_thread_handoff() {
    static BUF: DoubleBuffer<u32, 8> = DoubleBuffer::new();
    const TOTAL: u32 = 4_000;

    let producer = std::thread::spawn(|| {
        let mut next = 0;
        while next < TOTAL {
            if BUF.push(next) {
                next += 1;
            } else {
                std::thread::yield_now();
            }
        }
    });

    // Blocks must come out whole and in order
    let mut expected = 0;
    let mut half = Half::A;
    while expected < TOTAL {
        match BUF.drain(half, |b| b.to_vec()) {
            Some(block) => {
                for s in block {
                    assert_eq!(s, expected);
                    expected += 1;
                }
                half = if half == Half::A { Half::B } else { Half::A };
            }
            None => std::thread::yield_now(),
        }
    }

    producer.join().unwrap();
}

proptest! {
    #[test]
    fn prop_accepted_plus_overruns_equals_pushed(
        len in 1usize..=10,
        ops in prop::collection::vec(prop_oneof![Just(None), (0i16..100).prop_map(Some)], 0..200),
    ) {
        let buf: DoubleBuffer<i16, 10> = DoubleBuffer::new();
        buf.configure(len);

        let mut pushed = 0usize;
        let mut accepted = 0usize;
        let mut drained = 0usize;
        let mut next_half = Half::A;

        for op in ops {
            match op {
                Some(sample) => {
                    pushed += 1;
                    if buf.push(sample) {
                        accepted += 1;
                    }
                }
                None => {
                    if let Some(n) = buf.drain(next_half, |b| b.len()) {
                        prop_assert_eq!(n, len);
                        drained += n;
                        next_half = if next_half == Half::A { Half::B } else { Half::A };
                    }
                }
            }
        }

        prop_assert_eq!(accepted + buf.overruns(), pushed);
        // Whatever was not drained fits in the two halves
        prop_assert!(accepted - drained <= 2 * len);
    }
}
