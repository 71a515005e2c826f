//! # Frame Buffer - Multi-Stream, Timestamp-Ordered
//!
//! Decouples decode order from consumption order:
//! - One [`StreamQueue`] per stream, fixed at construction
//! - Every PTS rescaled once, on push, into a common timebase
//! - Global lowest-timestamp-first retrieval across streams
//! - Backpressure on the buffered span (newest - oldest) of the whole buffer
//! - Flush for seeking
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐ push ┌──────────────────────────────┐
//! │ Video    │─────►│ StreamQueue #0 ──┐           │
//! │ decoder  │      │                  │ lowest    │ next ┌──────────┐
//! ├──────────┤ push │                  ├─ oldest ──┼─────►│ Consumer │
//! │ Audio    │─────►│ StreamQueue #1 ──┘  pts      │      └──────────┘
//! │ decoder  │      │          FrameBuffer         │
//! └──────────┘      └──────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Any number of producers may push concurrently. A single logical consumer
//! calls [`FrameBuffer::next`], [`FrameBuffer::flush`] and
//! [`FrameBuffer::discard_before`]. Winner selection in `next` reads the
//! queues' atomics without locking, then locks only the winning queue and
//! re-validates its head; that pair is not safe under concurrent consumers.
//!
//! Push and next hold at most one queue lock. Flush takes every queue lock
//! in ascending stream index order and holds them together, so it cannot
//! deadlock against either.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::BufferError;
use crate::frame::Frame;
use crate::stats::{BufferCounters, BufferStats};
use crate::stream_queue::{QueuedFrame, StreamQueue};
use crate::timebase::{rescale, Timebase};

/// A stream taking part in a [`FrameBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub index: usize,
    pub timebase: Timebase,
}

impl StreamInfo {
    pub fn new(index: usize, timebase: Timebase) -> Self {
        Self { index, timebase }
    }
}

/// Result of [`FrameBuffer::next`]
#[derive(Debug)]
pub enum NextFrame {
    /// Globally oldest eligible frame, stamped in the common timebase
    Ready(Frame),
    /// Nothing eligible yet; retry after more pushes
    NotYetAvailable,
    /// Every stream is closed and empty
    Drained,
}

impl NextFrame {
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            Self::Ready(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_drained(&self) -> bool {
        matches!(self, Self::Drained)
    }
}

/// Thread-safe, timestamp-ordered buffer over a fixed set of streams
#[derive(Debug)]
pub struct FrameBuffer {
    timebase: Timebase,
    /// Maximum buffered span, common timebase ticks
    max_duration: i64,
    /// Sorted by stream index, never changes after construction
    streams: Vec<StreamQueue>,

    pushed: AtomicU64,
    popped: AtomicU64,
    discarded: AtomicU64,
    rejected_full: AtomicU64,
    rejected_out_of_order: AtomicU64,
}

impl FrameBuffer {
    /// Create a buffer over the complete, final set of streams.
    ///
    /// `max_duration` bounds the span between the oldest and newest buffered
    /// frame across all streams.
    pub fn new(
        timebase: Timebase,
        max_duration: Duration,
        streams: impl IntoIterator<Item = StreamInfo>,
    ) -> Result<Self, BufferError> {
        let mut streams: Vec<StreamInfo> = streams.into_iter().collect();
        if streams.is_empty() {
            return Err(BufferError::NoStreams);
        }

        streams.sort_by_key(|s| s.index);
        if let Some(dup) = streams.windows(2).find(|w| w[0].index == w[1].index) {
            return Err(BufferError::DuplicateStream(dup[0].index));
        }

        let max_ticks = timebase.ticks_from_duration(max_duration);
        debug!(
            "Frame buffer created: timebase={}, max_duration={} ticks ({:?}), streams={:?}",
            timebase,
            max_ticks,
            max_duration,
            streams.iter().map(|s| s.index).collect::<Vec<_>>()
        );

        Ok(Self {
            timebase,
            max_duration: max_ticks,
            streams: streams
                .into_iter()
                .map(|s| StreamQueue::new(s.index, s.timebase))
                .collect(),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            rejected_full: AtomicU64::new(0),
            rejected_out_of_order: AtomicU64::new(0),
        })
    }

    /// Common timebase of every buffered PTS
    pub fn timebase(&self) -> Timebase {
        self.timebase
    }

    /// Maximum buffered span in common timebase ticks
    pub fn max_duration(&self) -> i64 {
        self.max_duration
    }

    pub fn streams(&self) -> impl Iterator<Item = &StreamQueue> {
        self.streams.iter()
    }

    pub fn stream(&self, index: usize) -> Option<&StreamQueue> {
        self.streams
            .binary_search_by_key(&index, |q| q.index())
            .ok()
            .map(|pos| &self.streams[pos])
    }

    /// Buffered frames across all streams
    pub fn len(&self) -> usize {
        self.streams.iter().map(|q| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.iter().all(|q| q.is_empty())
    }

    // ========================================================================
    // Producer API (Decoder Threads)
    // ========================================================================

    /// Buffer a reference to `frame`.
    ///
    /// The caller keeps its own reference. `frame` must be stamped in the
    /// timebase its stream was registered with. Fails without side effects
    /// when the stream is unknown or closed, when the frame would stretch the
    /// buffered span beyond `max_duration`, or when its PTS is not strictly
    /// greater than the stream's newest buffered PTS.
    pub fn push(&self, frame: &Frame) -> Result<(), BufferError> {
        let index = frame.stream_index();
        let queue = self
            .stream(index)
            .ok_or(BufferError::UnknownStream(index))?;
        if queue.is_closed() {
            return Err(BufferError::StreamClosed(index));
        }
        if frame.timebase() != queue.timebase() {
            return Err(BufferError::TimebaseMismatch {
                stream: index,
                registered: queue.timebase(),
                frame: frame.timebase(),
            });
        }

        // i64::MIN marks an empty queue
        let pts = rescale(frame.pts(), queue.timebase(), self.timebase).max(i64::MIN + 1);

        if let Err(e) = self.check_span(pts) {
            self.rejected_full.fetch_add(1, Ordering::Relaxed);
            trace!("Push rejected on stream {}: {}", index, e);
            return Err(e);
        }

        let mut locked = queue.lock();
        if locked.is_closed() {
            return Err(BufferError::StreamClosed(index));
        }
        if let Err(e) = locked.push(pts, frame.clone()) {
            self.rejected_out_of_order.fetch_add(1, Ordering::Relaxed);
            trace!("Push rejected on stream {}: {}", index, e);
            return Err(e);
        }
        drop(locked);

        self.pushed.fetch_add(1, Ordering::Relaxed);
        trace!(
            "Pushed stream {} pts {} ({:.3}s, common {})",
            index,
            frame.pts(),
            frame.pts_seconds(),
            pts
        );
        Ok(())
    }

    /// Span the buffer would cover with `pts` added, from lock-free reads.
    fn check_span(&self, pts: i64) -> Result<(), BufferError> {
        let mut oldest = pts;
        let mut newest = pts;
        for q in &self.streams {
            if let Some(o) = q.oldest_pts() {
                oldest = oldest.min(o);
            }
            if let Some(n) = q.newest_pts() {
                newest = newest.max(n);
            }
        }

        if (newest as i128 - oldest as i128) > self.max_duration as i128 {
            return Err(BufferError::BufferFull {
                pts,
                oldest,
                newest,
                max: self.max_duration,
            });
        }
        Ok(())
    }

    /// Push, evicting the globally oldest frames while the buffer is full.
    ///
    /// Each evicted frame goes to `evicted`, which owns it from then on.
    /// This drains through [`next`](Self::next), so it counts as a consumer
    /// call. Gives up with `BufferFull` once nothing is left to evict, and
    /// without evicting anything when `frame` lies more than `max_duration`
    /// below the newest buffered frame.
    pub fn push_with_eviction(
        &self,
        frame: &Frame,
        mut evicted: impl FnMut(Frame),
    ) -> Result<(), BufferError> {
        loop {
            match self.push(frame) {
                // Evicting the oldest only frees room above it
                Err(e @ BufferError::BufferFull { pts, newest, max, .. })
                    if newest as i128 - pts as i128 > max as i128 =>
                {
                    trace!(
                        "Stream {} pts {} is below the window, not evicting",
                        frame.stream_index(),
                        pts
                    );
                    return Err(e);
                }
                Err(e) if e.is_full() => match self.next(i64::MIN) {
                    NextFrame::Ready(old) => {
                        trace!(
                            "Evicting stream {} pts {} to make room",
                            old.stream_index(),
                            old.pts()
                        );
                        evicted(old);
                    }
                    _ => return Err(e),
                },
                result => return result,
            }
        }
    }

    /// Mark a stream as finished; no further pushes are accepted for it.
    pub fn close_stream(&self, index: usize) -> Result<(), BufferError> {
        let queue = self
            .stream(index)
            .ok_or(BufferError::UnknownStream(index))?;
        queue.lock().close();
        debug!("Stream {} closed with {} frames buffered", index, queue.len());
        Ok(())
    }

    // ========================================================================
    // Consumer API
    // ========================================================================

    /// Take the buffered frame with the smallest PTS `>= after`.
    ///
    /// `after` is in the common timebase. Streams whose oldest frame lies
    /// below `after` are skipped, not drained. The returned frame is
    /// re-stamped with its common-timebase PTS.
    pub fn next(&self, after: i64) -> NextFrame {
        loop {
            let winner = self
                .streams
                .iter()
                .filter_map(|q| q.oldest_pts().filter(|&p| p >= after).map(|p| (p, q)))
                .min_by_key(|(p, q)| (*p, q.index()));

            let Some((_, queue)) = winner else {
                return self.idle_state();
            };

            let mut locked = queue.lock();
            if locked.front_pts().is_some_and(|p| p >= after) {
                if let Some(QueuedFrame { pts, mut frame }) = locked.pop() {
                    drop(locked);
                    frame.set_timestamp(pts, self.timebase);
                    self.popped.fetch_add(1, Ordering::Relaxed);
                    trace!("Next: stream {} pts {}", frame.stream_index(), pts);
                    return NextFrame::Ready(frame);
                }
            }

            warn!(
                "Stream {} head changed between selection and pop, retrying",
                queue.index()
            );
        }
    }

    fn idle_state(&self) -> NextFrame {
        if self.streams.iter().all(|q| q.is_closed() && q.is_empty()) {
            trace!("Next: drained");
            NextFrame::Drained
        } else {
            NextFrame::NotYetAvailable
        }
    }

    /// Release every buffered frame with a common-timebase PTS below `pts`.
    pub fn discard_before(&self, pts: i64) -> usize {
        let discarded: usize = self
            .streams
            .iter()
            .map(|q| q.lock().discard_before(pts))
            .sum();
        if discarded > 0 {
            self.discarded
                .fetch_add(discarded as u64, Ordering::Relaxed);
            debug!("Discarded {} frames before pts {}", discarded, pts);
        }
        discarded
    }

    // ========================================================================
    // Control API
    // ========================================================================

    /// Release every buffered frame and reopen all streams (for seeking).
    ///
    /// Returns the number of frame references released.
    pub fn flush(&self) -> usize {
        // Ascending index order, all held together
        let mut locked: Vec<_> = self.streams.iter().map(|q| q.lock()).collect();
        let released: usize = locked.iter_mut().map(|q| q.clear()).sum();
        drop(locked);

        self.discarded
            .fetch_add(released as u64, Ordering::Relaxed);
        debug!("Buffer flushed, released {} frames", released);
        released
    }

    // ========================================================================
    // Status API
    // ========================================================================

    /// Snapshot of the buffer from lock-free reads
    pub fn stats(&self) -> BufferStats {
        BufferStats::from_streams(
            self.timebase,
            self.max_duration,
            self.streams.iter().map(|q| q.snapshot()).collect(),
            self.counters(),
        )
    }

    pub fn counters(&self) -> BufferCounters {
        BufferCounters {
            pushed: self.pushed.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            rejected_full: self.rejected_full.load(Ordering::Relaxed),
            rejected_out_of_order: self.rejected_out_of_order.load(Ordering::Relaxed),
        }
    }
}
