//! Property-based tests for the frame buffer.
//!
//! Single-threaded operation sequences; the invariants must hold after
//! every step, not just at the end.

use std::collections::BTreeSet;
use std::time::Duration;

use framesync_core::{
    BufferError, Frame, FrameBuffer, FrameCursor, MediaKind, NextFrame, StreamInfo, Timebase,
};
use proptest::prelude::*;

fn ms_buffer(streams: usize, max_ms: u64) -> FrameBuffer {
    FrameBuffer::new(
        Timebase::MILLISECONDS,
        Duration::from_millis(max_ms),
        (0..streams).map(|i| StreamInfo::new(i, Timebase::MILLISECONDS)),
    )
    .unwrap()
}

fn frame(stream: usize, pts: i64) -> Frame {
    Frame::new(stream, pts, Timebase::MILLISECONDS, MediaKind::Data)
}

#[derive(Debug, Clone)]
enum Op {
    Push { stream: usize, pts: i64 },
    Next,
}

fn op_strategy(streams: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..streams, -500i64..2_000).prop_map(|(stream, pts)| Op::Push { stream, pts }),
        1 => Just(Op::Next),
    ]
}

proptest! {
    #[test]
    fn per_stream_pts_strictly_increasing(pts in prop::collection::vec(-1_000i64..1_000, 1..64)) {
        let buffer = ms_buffer(1, 10_000);
        let mut newest: Option<i64> = None;
        let mut accepted = Vec::new();

        for p in pts {
            let before = buffer.len();
            match buffer.push(&frame(0, p)) {
                Ok(()) => {
                    prop_assert!(newest.map_or(true, |n| p > n));
                    newest = Some(p);
                    accepted.push(p);
                }
                Err(BufferError::OutOfOrder { pts, newest: n, .. }) => {
                    prop_assert_eq!(pts, p);
                    prop_assert!(p <= n);
                    prop_assert_eq!(buffer.len(), before);
                }
                Err(e) => prop_assert!(false, "unexpected error {}", e),
            }
            prop_assert_eq!(buffer.stream(0).unwrap().newest_pts(), newest);
        }

        let drained: Vec<i64> = std::iter::from_fn(|| buffer.next(i64::MIN).into_frame())
            .map(|f| f.pts())
            .collect();
        prop_assert_eq!(drained, accepted);
    }

    #[test]
    fn duration_never_exceeds_bound(
        max_ms in 0u64..600,
        ops in prop::collection::vec(op_strategy(3), 1..128),
    ) {
        let buffer = ms_buffer(3, max_ms);
        let max = buffer.max_duration();

        for op in ops {
            match op {
                Op::Push { stream, pts } => {
                    let before = buffer.stats();
                    if let Err(e) = buffer.push(&frame(stream, pts)) {
                        let after = buffer.stats();
                        prop_assert_eq!(after.total_frames, before.total_frames);
                        prop_assert_eq!(after.oldest_pts, before.oldest_pts);
                        prop_assert_eq!(after.newest_pts, before.newest_pts);
                        let expected = e.is_full() || matches!(e, BufferError::OutOfOrder { .. });
                        prop_assert!(expected, "unexpected error {}", e);
                    }
                }
                Op::Next => {
                    let _ = buffer.next(i64::MIN);
                }
            }
            let stats = buffer.stats();
            prop_assert!(stats.duration <= max, "duration {} > {}", stats.duration, max);
        }
    }

    #[test]
    fn drain_is_ordered_and_complete(
        streams in prop::collection::vec(prop::collection::btree_set(-200i64..1_000, 0..24), 1..4),
    ) {
        let buffer = ms_buffer(streams.len(), 10_000);
        let mut pushed = 0usize;
        for (index, pts_set) in streams.iter().enumerate() {
            for &pts in pts_set {
                buffer.push(&frame(index, pts)).unwrap();
                pushed += 1;
            }
            buffer.close_stream(index).unwrap();
        }

        let mut cursor = FrameCursor::new(&buffer);
        let mut drained = Vec::new();
        loop {
            match cursor.poll() {
                NextFrame::Ready(f) => drained.push((f.pts(), f.stream_index())),
                NextFrame::Drained => break,
                NextFrame::NotYetAvailable => prop_assert!(false, "stalled with frames buffered"),
            }
        }

        prop_assert_eq!(drained.len(), pushed);
        prop_assert!(drained.windows(2).all(|w| w[0].0 <= w[1].0));

        let expected: BTreeSet<(i64, usize)> = streams
            .iter()
            .enumerate()
            .flat_map(|(i, set)| set.iter().map(move |&p| (p, i)))
            .collect();
        let got: BTreeSet<(i64, usize)> = drained.into_iter().collect();
        prop_assert_eq!(got, expected);

        // idempotent
        prop_assert!(buffer.next(i64::MIN).is_drained());
        prop_assert!(buffer.next(0).is_drained());
    }
}
