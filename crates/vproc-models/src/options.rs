//! Job options and the preset tables they map onto.
//!
//! Presets are configuration data: adding a resolution or quality tier here
//! does not change the wire protocol.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobKind};
use crate::protocol::WorkerRequest;

/// Default thumbnail width in pixels
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 320;
/// Default thumbnail timestamp in seconds
pub const DEFAULT_THUMBNAIL_TIMESTAMP: f64 = 1.0;
/// Default optimized image bounds
pub const DEFAULT_OPTIMIZE_MAX_WIDTH: u32 = 1920;
pub const DEFAULT_OPTIMIZE_MAX_HEIGHT: u32 = 1080;
/// Default optimized image quality (0-100)
pub const DEFAULT_OPTIMIZE_QUALITY: u8 = 80;

/// Target output resolution for transcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum Resolution {
    #[serde(rename = "480p")]
    P480,
    #[default]
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
}

impl Resolution {
    /// Output frame size `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::P480 => (854, 480),
            Resolution::P720 => (1280, 720),
            Resolution::P1080 => (1920, 1080),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::P480 => "480p",
            Resolution::P720 => "720p",
            Resolution::P1080 => "1080p",
        }
    }
}

/// Encoder parameters a quality tier maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodePreset {
    /// Constant Rate Factor (lower is better quality)
    pub crf: u8,
    /// Encoder speed preset (slower trades time for size)
    pub speed: &'static str,
}

/// Quality tier for transcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    High,
    #[default]
    Medium,
    Low,
}

impl Quality {
    pub fn encode_preset(&self) -> EncodePreset {
        match self {
            Quality::High => EncodePreset {
                crf: 18,
                speed: "slow",
            },
            Quality::Medium => EncodePreset {
                crf: 23,
                speed: "medium",
            },
            Quality::Low => EncodePreset {
                crf: 28,
                speed: "veryfast",
            },
        }
    }
}

/// Output container for transcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoFormat {
    #[default]
    Mp4,
    Webm,
}

impl VideoFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            VideoFormat::Mp4 => "mp4",
            VideoFormat::Webm => "webm",
        }
    }

    pub fn video_codec(&self) -> &'static str {
        match self {
            VideoFormat::Mp4 => "libx264",
            VideoFormat::Webm => "libvpx-vp9",
        }
    }

    pub fn audio_codec(&self) -> &'static str {
        match self {
            VideoFormat::Mp4 => "aac",
            VideoFormat::Webm => "libopus",
        }
    }
}

/// Still image output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
        }
    }
}

/// Transcode parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscodeOptions {
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub format: VideoFormat,
    #[serde(default)]
    pub quality: Quality,
}

/// Thumbnail extraction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ThumbnailOptions {
    /// Position of the frame to grab, in seconds
    #[serde(default = "default_thumbnail_timestamp")]
    pub timestamp_seconds: f64,
    /// Output width in pixels
    #[serde(default = "default_thumbnail_width")]
    pub width: u32,
    /// Output height in pixels; `None` keeps the aspect ratio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default)]
    pub format: ImageFormat,
}

fn default_thumbnail_timestamp() -> f64 {
    DEFAULT_THUMBNAIL_TIMESTAMP
}
fn default_thumbnail_width() -> u32 {
    DEFAULT_THUMBNAIL_WIDTH
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            timestamp_seconds: DEFAULT_THUMBNAIL_TIMESTAMP,
            width: DEFAULT_THUMBNAIL_WIDTH,
            height: None,
            format: ImageFormat::default(),
        }
    }
}

/// Image optimization parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OptimizeOptions {
    #[serde(default = "default_optimize_max_width")]
    pub max_width: u32,
    #[serde(default = "default_optimize_max_height")]
    pub max_height: u32,
    /// Output quality, 0-100 (higher is better)
    #[serde(default = "default_optimize_quality")]
    pub quality: u8,
    #[serde(default = "default_optimize_format")]
    pub format: ImageFormat,
}

fn default_optimize_max_width() -> u32 {
    DEFAULT_OPTIMIZE_MAX_WIDTH
}
fn default_optimize_max_height() -> u32 {
    DEFAULT_OPTIMIZE_MAX_HEIGHT
}
fn default_optimize_quality() -> u8 {
    DEFAULT_OPTIMIZE_QUALITY
}
fn default_optimize_format() -> ImageFormat {
    ImageFormat::Webp
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_OPTIMIZE_MAX_WIDTH,
            max_height: DEFAULT_OPTIMIZE_MAX_HEIGHT,
            quality: DEFAULT_OPTIMIZE_QUALITY,
            format: ImageFormat::Webp,
        }
    }
}

/// Source binary handed to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceMedia {
    /// Original file name; its extension is kept in working storage
    pub name: String,
    #[serde(with = "crate::blob")]
    #[schemars(with = "String")]
    pub bytes: Vec<u8>,
}

impl SourceMedia {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Lower-cased file extension, if the name has one.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(|e| e.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Request payload: the source plus kind-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobPayload<O> {
    pub source: SourceMedia,
    pub options: O,
}

/// A job as submitted by the caller, before an id is assigned.
#[derive(Debug, Clone, PartialEq)]
pub enum JobRequest {
    Transcode(JobPayload<TranscodeOptions>),
    Thumbnail(JobPayload<ThumbnailOptions>),
    Optimize(JobPayload<OptimizeOptions>),
}

impl JobRequest {
    pub fn transcode(source: SourceMedia, options: TranscodeOptions) -> Self {
        Self::Transcode(JobPayload { source, options })
    }

    pub fn thumbnail(source: SourceMedia, options: ThumbnailOptions) -> Self {
        Self::Thumbnail(JobPayload { source, options })
    }

    pub fn optimize(source: SourceMedia, options: OptimizeOptions) -> Self {
        Self::Optimize(JobPayload { source, options })
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Transcode(_) => JobKind::Transcode,
            JobRequest::Thumbnail(_) => JobKind::Thumbnail,
            JobRequest::Optimize(_) => JobKind::Optimize,
        }
    }

    pub fn source(&self) -> &SourceMedia {
        match self {
            JobRequest::Transcode(p) => &p.source,
            JobRequest::Thumbnail(p) => &p.source,
            JobRequest::Optimize(p) => &p.source,
        }
    }

    /// Attach an id and turn this into the message sent across the boundary.
    pub fn into_wire(self, id: JobId) -> WorkerRequest {
        match self {
            JobRequest::Transcode(payload) => WorkerRequest::Transcode { id, payload },
            JobRequest::Thumbnail(payload) => WorkerRequest::Thumbnail { id, payload },
            JobRequest::Optimize(payload) => WorkerRequest::Optimize { id, payload },
        }
    }
}
