use thiserror::Error;

use crate::timebase::Timebase;

/// Failures reported by [`FrameBuffer`](crate::buffer::FrameBuffer).
///
/// Every failed operation leaves the buffer exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("Unknown stream: {0}")]
    UnknownStream(usize),
    #[error("Duplicate stream index: {0}")]
    DuplicateStream(usize),
    #[error("Frame buffer needs at least one stream")]
    NoStreams,
    #[error("Invalid timebase {num}/{den}")]
    InvalidTimebase { num: i32, den: i32 },
    #[error("Cannot parse timebase {0:?}, expected \"num/den\"")]
    ParseTimebase(String),
    #[error("Stream {stream} is registered at {registered}, frame is stamped {frame}")]
    TimebaseMismatch {
        stream: usize,
        registered: Timebase,
        frame: Timebase,
    },
    #[error("Buffer full: pts {pts} would span [{oldest}, {newest}] beyond {max} ticks")]
    BufferFull {
        pts: i64,
        oldest: i64,
        newest: i64,
        max: i64,
    },
    #[error("Out of order on stream {stream}: pts {pts} <= newest {newest}")]
    OutOfOrder { stream: usize, pts: i64, newest: i64 },
    #[error("Stream {0} is closed")]
    StreamClosed(usize),
}

impl BufferError {
    /// Stream-set errors: a lookup miss or an invalid set at construction.
    pub fn is_unknown_stream(&self) -> bool {
        matches!(
            self,
            Self::UnknownStream(_) | Self::DuplicateStream(_) | Self::NoStreams
        )
    }

    /// Backpressure; drain with `next` and retry.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::BufferFull { .. })
    }
}

/// Failures loading a [`BufferConfig`](crate::config::BufferConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
