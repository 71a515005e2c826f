//! # FrameSync Core
//!
//! Multi-stream, timestamp-ordered frame buffering between decoders and
//! consumers: synchronized A/V playback, seeking, bounded-memory transcoding.

// ============================================================================
// Timing
// ============================================================================
pub mod timebase;

// ============================================================================
// Frames
// ============================================================================
pub mod frame;

// ============================================================================
// Buffering
// ============================================================================
pub mod buffer;
pub mod cursor;
pub mod stats;
mod stream_queue;

// ============================================================================
// Configuration / Errors
// ============================================================================
pub mod config;
pub mod error;

pub use buffer::{FrameBuffer, NextFrame, StreamInfo};
pub use config::{BufferConfig, StreamConfig};
pub use cursor::FrameCursor;
pub use error::{BufferError, ConfigError};
pub use frame::{Frame, FramePool, MediaKind, PixelFormat, PoolStats};
pub use stats::{BufferCounters, BufferStats, StreamStats};
pub use stream_queue::StreamQueue;
pub use timebase::{rescale, Timebase};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
