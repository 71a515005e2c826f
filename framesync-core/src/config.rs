//! Buffer configuration, loadable from JSON.
//!
//! ```json
//! {
//!   "timebase": "1/90000",
//!   "max_duration_ms": 2000,
//!   "streams": [
//!     { "index": 0, "timebase": "1/90000",
//!       "kind": { "type": "video", "width": 1920, "height": 1080, "format": "NV12" } },
//!     { "index": 1, "timebase": "1/48000" }
//!   ]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::{FrameBuffer, StreamInfo};
use crate::error::{BufferError, ConfigError};
use crate::frame::{MediaKind, PixelFormat};
use crate::timebase::Timebase;

fn default_max_duration_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub index: usize,
    pub timebase: Timebase,
    /// Payload layout producers allocate for this stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
}

impl StreamConfig {
    pub fn info(&self) -> StreamInfo {
        StreamInfo::new(self.index, self.timebase)
    }

    pub fn kind_or_data(&self) -> MediaKind {
        self.kind.unwrap_or(MediaKind::Data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Common timebase for cross-stream ordering
    #[serde(default)]
    pub timebase: Timebase,
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
    pub streams: Vec<StreamConfig>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            timebase: Timebase::MPEG,
            max_duration_ms: default_max_duration_ms(),
            streams: vec![
                StreamConfig {
                    index: 0,
                    timebase: Timebase::MPEG,
                    kind: Some(MediaKind::Video {
                        width: 1280,
                        height: 720,
                        format: PixelFormat::NV12,
                    }),
                },
                StreamConfig {
                    index: 1,
                    timebase: Timebase::AUDIO_48K,
                    kind: Some(MediaKind::Audio {
                        sample_rate: 48_000,
                        channels: 2,
                        samples: 1024,
                    }),
                },
            ],
        }
    }
}

impl BufferConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn stream(&self, index: usize) -> Option<&StreamConfig> {
        self.streams.iter().find(|s| s.index == index)
    }
}

impl FrameBuffer {
    /// Build a buffer from a configuration, validating it like [`FrameBuffer::new`]
    pub fn from_config(config: &BufferConfig) -> Result<Self, BufferError> {
        Self::new(
            config.timebase,
            config.max_duration(),
            config.streams.iter().map(StreamConfig::info),
        )
    }
}
