//! Read-only snapshots of buffer state, for monitoring and flow control.

use std::fmt;

use serde::Serialize;

use crate::timebase::Timebase;

/// One stream's queue at the time of the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub index: usize,
    pub timebase: Timebase,
    pub frames: usize,
    /// Common timebase, `None` when empty
    pub oldest_pts: Option<i64>,
    pub newest_pts: Option<i64>,
    pub closed: bool,
}

/// Aggregate buffer state.
///
/// Built from lock-free loads, so fields read from different queues may be
/// a few operations apart under concurrent pushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub timebase: Timebase,
    pub total_frames: usize,
    /// Oldest PTS across all non-empty streams, `None` when empty
    pub oldest_pts: Option<i64>,
    /// Newest PTS across all non-empty streams, `None` when empty
    pub newest_pts: Option<i64>,
    /// `newest - oldest`, zero when empty
    pub duration: i64,
    pub max_duration: i64,
    /// `duration >= max_duration`
    pub full: bool,
    /// Every registered stream has been closed
    pub all_closed: bool,
    pub streams: Vec<StreamStats>,
    pub counters: BufferCounters,
}

impl BufferStats {
    pub(crate) fn from_streams(
        timebase: Timebase,
        max_duration: i64,
        streams: Vec<StreamStats>,
        counters: BufferCounters,
    ) -> Self {
        let total_frames = streams.iter().map(|s| s.frames).sum();
        let oldest_pts = streams.iter().filter_map(|s| s.oldest_pts).min();
        let newest_pts = streams.iter().filter_map(|s| s.newest_pts).max();
        let duration = match (oldest_pts, newest_pts) {
            (Some(oldest), Some(newest)) => newest.saturating_sub(oldest).max(0),
            _ => 0,
        };
        let all_closed = streams.iter().all(|s| s.closed);

        Self {
            timebase,
            total_frames,
            oldest_pts,
            newest_pts,
            duration,
            max_duration,
            full: duration >= max_duration,
            all_closed,
            streams,
            counters,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_frames == 0
    }

    /// True when every stream is closed and nothing is left to read
    pub fn is_drained(&self) -> bool {
        self.all_closed && self.total_frames == 0
    }

    /// Fill level of the duration bound (0.0 - 1.0)
    pub fn fill_level(&self) -> f32 {
        if self.max_duration <= 0 {
            return if self.total_frames > 0 { 1.0 } else { 0.0 };
        }
        (self.duration as f32 / self.max_duration as f32).min(1.0)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.timebase.to_seconds(self.duration)
    }
}

impl fmt::Display for BufferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames={} span={:.3}s ({:.0}%) full={} closed={}",
            self.total_frames,
            self.duration_seconds(),
            self.fill_level() * 100.0,
            self.full,
            self.all_closed
        )?;
        for s in &self.streams {
            write!(f, " [#{}: {}{}]", s.index, s.frames, if s.closed { " eos" } else { "" })?;
        }
        Ok(())
    }
}

/// Lifetime totals since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferCounters {
    pub pushed: u64,
    pub popped: u64,
    /// Released by `discard_before` or `flush`
    pub discarded: u64,
    pub rejected_full: u64,
    pub rejected_out_of_order: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(index: usize, frames: usize, range: Option<(i64, i64)>, closed: bool) -> StreamStats {
        StreamStats {
            index,
            timebase: Timebase::MPEG,
            frames,
            oldest_pts: range.map(|r| r.0),
            newest_pts: range.map(|r| r.1),
            closed,
        }
    }

    #[test]
    fn test_aggregates_across_streams() {
        let stats = BufferStats::from_streams(
            Timebase::MPEG,
            90_000,
            vec![
                stream(0, 3, Some((3_000, 9_000)), false),
                stream(1, 2, Some((1_000, 4_000)), true),
                stream(2, 0, None, true),
            ],
            BufferCounters::default(),
        );
        assert_eq!(stats.total_frames, 5);
        assert_eq!(stats.oldest_pts, Some(1_000));
        assert_eq!(stats.newest_pts, Some(9_000));
        assert_eq!(stats.duration, 8_000);
        assert!(!stats.full);
        assert!(!stats.all_closed);
        assert!(!stats.is_drained());
    }

    #[test]
    fn test_empty_stats() {
        let stats = BufferStats::from_streams(
            Timebase::MPEG,
            90_000,
            vec![stream(0, 0, None, true)],
            BufferCounters::default(),
        );
        assert!(stats.is_empty());
        assert_eq!(stats.oldest_pts, None);
        assert_eq!(stats.duration, 0);
        assert!(stats.all_closed);
        assert!(stats.is_drained());
        assert_eq!(stats.fill_level(), 0.0);
    }

    #[test]
    fn test_full_at_bound() {
        let stats = BufferStats::from_streams(
            Timebase::MPEG,
            90_000,
            vec![stream(0, 2, Some((0, 90_000)), false)],
            BufferCounters::default(),
        );
        assert!(stats.full);
        assert_eq!(stats.fill_level(), 1.0);
        assert!(stats.to_string().starts_with("frames=2 span=1.000s (100%)"));
    }
}
