//! Consumer-side cursor over a [`FrameBuffer`].
//!
//! The buffer never blocks. The cursor keeps the PTS of the last frame it
//! returned so consumption stays monotonic, and layers a sleep-and-retry
//! wait on top for callers without their own event loop.
//!
//! A frame pushed late, below the cursor's position, is never eligible
//! again. With [`FrameCursor::drop_late`] the cursor releases such frames
//! once nothing else is available, the way a player drops frames that
//! missed their presentation time.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::buffer::{FrameBuffer, NextFrame};
use crate::frame::Frame;

const MIN_BACKOFF: Duration = Duration::from_micros(100);
const MAX_BACKOFF: Duration = Duration::from_millis(5);

/// Single consumer reading a buffer in timestamp order
#[derive(Debug)]
pub struct FrameCursor<'a> {
    buffer: &'a FrameBuffer,
    last_pts: i64,
    drop_late: bool,
    dropped: u64,
}

impl<'a> FrameCursor<'a> {
    pub fn new(buffer: &'a FrameBuffer) -> Self {
        Self {
            buffer,
            last_pts: i64::MIN,
            drop_late: false,
            dropped: 0,
        }
    }

    /// Release frames stranded below the cursor position when idle
    pub fn drop_late(mut self, enabled: bool) -> Self {
        self.drop_late = enabled;
        self
    }

    /// Late frames released so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// PTS of the last frame returned, common timebase
    pub fn last_pts(&self) -> Option<i64> {
        (self.last_pts != i64::MIN).then_some(self.last_pts)
    }

    /// One non-blocking read
    pub fn poll(&mut self) -> NextFrame {
        let next = self.buffer.next(self.last_pts);
        match &next {
            NextFrame::Ready(frame) => self.last_pts = frame.pts(),
            NextFrame::NotYetAvailable if self.drop_late && self.last_pts != i64::MIN => {
                let late = self.buffer.discard_before(self.last_pts);
                if late > 0 {
                    self.dropped += late as u64;
                    trace!("Dropped {} late frames before pts {}", late, self.last_pts);
                }
            }
            _ => {}
        }
        next
    }

    /// Poll until a frame arrives, the buffer drains, or `timeout` elapses.
    ///
    /// Returns `NotYetAvailable` on timeout.
    pub fn wait(&mut self, timeout: Duration) -> NextFrame {
        let deadline = Instant::now() + timeout;
        let mut backoff = MIN_BACKOFF;

        loop {
            match self.poll() {
                NextFrame::NotYetAvailable => {}
                done => return done,
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return NextFrame::NotYetAvailable;
            }
            std::thread::sleep(backoff.min(remaining));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Flush the buffer and start over from the beginning of the timeline.
    pub fn seek(&mut self) -> usize {
        let released = self.buffer.flush();
        self.last_pts = i64::MIN;
        debug!("Cursor reset after seek, {} frames released", released);
        released
    }

    /// Iterate frames until the buffer drains or a wait times out
    pub fn frames(&mut self, timeout: Duration) -> Frames<'_, 'a> {
        Frames {
            cursor: self,
            timeout,
        }
    }
}

/// Iterator over frames from a [`FrameCursor`]
pub struct Frames<'c, 'a> {
    cursor: &'c mut FrameCursor<'a>,
    timeout: Duration,
}

impl Iterator for Frames<'_, '_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.wait(self.timeout).into_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::StreamInfo;
    use crate::frame::MediaKind;
    use crate::timebase::Timebase;
    use std::sync::Arc;

    fn buffer(streams: &[usize]) -> FrameBuffer {
        FrameBuffer::new(
            Timebase::MILLISECONDS,
            Duration::from_secs(10),
            streams
                .iter()
                .map(|&i| StreamInfo::new(i, Timebase::MILLISECONDS)),
        )
        .unwrap()
    }

    fn push(buffer: &FrameBuffer, stream: usize, pts: i64) {
        buffer
            .push(&Frame::new(stream, pts, Timebase::MILLISECONDS, MediaKind::Data))
            .unwrap();
    }

    #[test]
    fn test_poll_tracks_last_pts() {
        let buffer = buffer(&[0, 1]);
        push(&buffer, 0, 10);
        push(&buffer, 1, 10);
        push(&buffer, 0, 20);

        let mut cursor = FrameCursor::new(&buffer);
        assert_eq!(cursor.last_pts(), None);

        let pts: Vec<i64> = std::iter::from_fn(|| cursor.poll().into_frame())
            .map(|f| f.pts())
            .collect();
        assert_eq!(pts, vec![10, 10, 20]);
        assert_eq!(cursor.last_pts(), Some(20));
    }

    #[test]
    fn test_wait_times_out() {
        let buffer = buffer(&[0]);
        let mut cursor = FrameCursor::new(&buffer);
        let start = Instant::now();
        assert!(matches!(
            cursor.wait(Duration::from_millis(20)),
            NextFrame::NotYetAvailable
        ));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_sees_late_push() {
        let buffer = Arc::new(buffer(&[0]));
        let producer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                push(&buffer, 0, 42);
                buffer.close_stream(0).unwrap();
            })
        };

        let mut cursor = FrameCursor::new(&buffer);
        let frame = cursor.wait(Duration::from_secs(5)).into_frame().unwrap();
        assert_eq!(frame.pts(), 42);
        producer.join().unwrap();
        assert!(cursor.wait(Duration::from_secs(5)).is_drained());
    }

    #[test]
    fn test_frames_iterator_stops_when_drained() {
        let buffer = buffer(&[0, 1]);
        for pts in 0..5 {
            push(&buffer, 0, pts * 2);
            push(&buffer, 1, pts * 2 + 1);
        }
        buffer.close_stream(0).unwrap();
        buffer.close_stream(1).unwrap();

        let mut cursor = FrameCursor::new(&buffer);
        let pts: Vec<i64> = cursor
            .frames(Duration::from_millis(100))
            .map(|f| f.pts())
            .collect();
        assert_eq!(pts, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_late_frames_strand_without_drop_late() {
        let buffer = buffer(&[0, 1]);
        push(&buffer, 0, 30);
        let mut cursor = FrameCursor::new(&buffer);
        assert_eq!(cursor.poll().into_frame().unwrap().pts(), 30);

        // stream 1 arrives behind the cursor
        push(&buffer, 1, 10);
        buffer.close_stream(0).unwrap();
        buffer.close_stream(1).unwrap();
        assert!(matches!(cursor.poll(), NextFrame::NotYetAvailable));
        assert!(matches!(cursor.poll(), NextFrame::NotYetAvailable));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_drop_late_releases_stranded_frames() {
        let buffer = buffer(&[0, 1]);
        push(&buffer, 0, 30);
        let mut cursor = FrameCursor::new(&buffer).drop_late(true);
        assert!(cursor.poll().is_ready());

        push(&buffer, 1, 10);
        push(&buffer, 1, 30);
        buffer.close_stream(0).unwrap();
        buffer.close_stream(1).unwrap();

        assert!(matches!(cursor.poll(), NextFrame::NotYetAvailable));
        assert_eq!(cursor.dropped(), 1);

        // equal pts is still eligible
        assert_eq!(cursor.poll().into_frame().unwrap().stream_index(), 1);
        assert!(cursor.poll().is_drained());
        assert_eq!(cursor.dropped(), 1);
    }

    #[test]
    fn test_seek_rewinds() {
        let buffer = buffer(&[0]);
        push(&buffer, 0, 100);
        push(&buffer, 0, 200);

        let mut cursor = FrameCursor::new(&buffer);
        assert!(cursor.poll().is_ready());
        assert_eq!(cursor.seek(), 1);
        assert_eq!(cursor.last_pts(), None);

        push(&buffer, 0, 50);
        assert_eq!(cursor.poll().into_frame().unwrap().pts(), 50);
    }
}
