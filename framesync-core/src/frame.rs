//! # Frames - Reference-Counted Media Units
//!
//! A [`Frame`] is a cheap handle: cloning it takes a new reference to the
//! shared payload, dropping it releases one. Timestamp fields belong to the
//! reference, not the payload, so the buffer can re-stamp its own reference
//! without touching the producer's.
//!
//! Payload memory is released the moment the last reference goes away.
//! Frames acquired from a [`FramePool`] hand their buffer back to the pool at
//! that point, so decoders can rely on release timing for buffer reuse.
//!
//! ```text
//! ┌──────────┐ acquire ┌───────┐  push   ┌─────────────┐  next  ┌──────────┐
//! │ FramePool│────────►│ Frame │───────►│ FrameBuffer │───────►│ Consumer │
//! └──────────┘         └───────┘ (clone) └─────────────┘ (move) └──────────┘
//!      ▲                                                             │
//!      └──────────────────── last reference dropped ─────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::timebase::Timebase;

// ============================================================================
// Media Description
// ============================================================================

/// Pixel format for video payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    NV12,
    YUV420P,
    RGB24,
    RGBA32,
    P010,  // 10-bit HDR
}

impl PixelFormat {
    /// Calculate buffer size for this format
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        let w = width as usize;
        let h = height as usize;
        match self {
            Self::NV12 | Self::YUV420P => w * h * 3 / 2,
            Self::RGB24 => w * h * 3,
            Self::RGBA32 => w * h * 4,
            Self::P010 => w * h * 3,  // 10-bit = 2 bytes Y, 1 byte UV avg
        }
    }
}

/// What a payload holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaKind {
    Video {
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    /// Interleaved f32 samples
    Audio {
        sample_rate: u32,
        channels: u16,
        samples: u32,
    },
    Data,
}

impl MediaKind {
    pub fn buffer_size(&self) -> usize {
        match self {
            Self::Video { width, height, format } => format.buffer_size(*width, *height),
            Self::Audio { channels, samples, .. } => {
                *channels as usize * *samples as usize * std::mem::size_of::<f32>()
            }
            Self::Data => 0,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video { .. })
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio { .. })
    }
}

// ============================================================================
// Frame Handle
// ============================================================================

static FRAME_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
struct Payload {
    id: u64,
    kind: MediaKind,
    data: PooledBuffer,
}

/// A reference to a shared media payload, stamped with a stream and PTS.
#[derive(Debug, Clone)]
pub struct Frame {
    stream_index: usize,
    pts: i64,
    timebase: Timebase,
    payload: Arc<Payload>,
}

impl Frame {
    /// Create a frame with a zeroed, unpooled buffer sized for `kind`
    pub fn new(stream_index: usize, pts: i64, timebase: Timebase, kind: MediaKind) -> Self {
        Self::with_data(stream_index, pts, timebase, kind, vec![0u8; kind.buffer_size()])
    }

    /// Create a frame that owns `data`
    pub fn with_data(
        stream_index: usize,
        pts: i64,
        timebase: Timebase,
        kind: MediaKind,
        data: Vec<u8>,
    ) -> Self {
        Self::from_buffer(stream_index, pts, timebase, kind, PooledBuffer::unpooled(data))
    }

    fn from_buffer(
        stream_index: usize,
        pts: i64,
        timebase: Timebase,
        kind: MediaKind,
        data: PooledBuffer,
    ) -> Self {
        Self {
            stream_index,
            pts,
            timebase,
            payload: Arc::new(Payload {
                id: FRAME_COUNTER.fetch_add(1, Ordering::Relaxed),
                kind,
                data,
            }),
        }
    }

    /// Payload identity, shared by every reference to it
    pub fn id(&self) -> u64 {
        self.payload.id
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn timebase(&self) -> Timebase {
        self.timebase
    }

    pub fn kind(&self) -> MediaKind {
        self.payload.kind
    }

    pub fn data(&self) -> &[u8] {
        &self.payload.data.bytes
    }

    /// Writable payload access, only while this is the sole reference.
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        Arc::get_mut(&mut self.payload).map(|p| p.data.bytes.as_mut_slice())
    }

    /// Re-stamp this reference. Other references keep their own timestamps.
    pub fn set_timestamp(&mut self, pts: i64, timebase: Timebase) {
        self.pts = pts;
        self.timebase = timebase;
    }

    /// Live references to the payload, this one included
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.payload)
    }

    /// True when both handles reference the same payload
    pub fn shares_payload(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }

    /// PTS in seconds, for logging
    pub fn pts_seconds(&self) -> f64 {
        self.timebase.to_seconds(self.pts)
    }
}

// ============================================================================
// Frame Pool - Memory Reuse
// ============================================================================

#[derive(Debug)]
struct PooledBuffer {
    bytes: Vec<u8>,
    pool: Option<Weak<PoolShared>>,
}

impl PooledBuffer {
    fn unpooled(bytes: Vec<u8>) -> Self {
        Self { bytes, pool: None }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take().and_then(|w| w.upgrade()) {
            pool.recycle(std::mem::take(&mut self.bytes));
        }
    }
}

#[derive(Debug)]
struct PoolState {
    kind: MediaKind,
    buffers: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct PoolShared {
    state: Mutex<PoolState>,
    allocated: AtomicU64,
    recycled: AtomicU64,
}

impl PoolShared {
    fn recycle(&self, buf: Vec<u8>) {
        let mut state = self.state.lock();
        // Only recycle if the size still matches
        if buf.len() == state.kind.buffer_size() {
            state.buffers.push(buf);
        }
    }
}

/// Pool of pre-allocated payload buffers to avoid allocation during decode.
///
/// Cloning the pool gives another handle to the same buffers. Frames do not
/// keep the pool alive; a buffer released after the pool is gone is freed.
#[derive(Debug, Clone)]
pub struct FramePool {
    shared: Arc<PoolShared>,
}

impl FramePool {
    /// Create a new frame pool
    pub fn new(kind: MediaKind, initial_size: usize) -> Self {
        let size = kind.buffer_size();
        let buffers = (0..initial_size).map(|_| vec![0u8; size]).collect();

        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState { kind, buffers }),
                allocated: AtomicU64::new(initial_size as u64),
                recycled: AtomicU64::new(0),
            }),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.shared.state.lock().kind
    }

    /// Get a frame backed by a pooled buffer (or allocate new).
    ///
    /// Recycled buffers keep their previous contents.
    pub fn acquire(&self, stream_index: usize, pts: i64, timebase: Timebase) -> Frame {
        let (kind, recycled) = {
            let mut state = self.shared.state.lock();
            (state.kind, state.buffers.pop())
        };
        let bytes = match recycled {
            Some(buf) => {
                self.shared.recycled.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.shared.allocated.fetch_add(1, Ordering::Relaxed);
                vec![0u8; kind.buffer_size()]
            }
        };

        let buffer = PooledBuffer {
            bytes,
            pool: Some(Arc::downgrade(&self.shared)),
        };
        Frame::from_buffer(stream_index, pts, timebase, kind, buffer)
    }

    /// Switch to a new payload layout, discarding idle buffers
    pub fn resize(&self, kind: MediaKind) {
        let mut state = self.shared.state.lock();
        state.buffers.clear();
        state.kind = kind;
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.shared.state.lock().buffers.len(),
            total_allocated: self.shared.allocated.load(Ordering::Relaxed),
            total_recycled: self.shared.recycled.load(Ordering::Relaxed),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub available: usize,
    pub total_allocated: u64,
    pub total_recycled: u64,
}
