//! Processing results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metadata computed for a processed output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Duration for time-based media
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Codec of the primary stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    /// Size of the output blob
    pub size_bytes: u64,
}

impl MediaMetadata {
    pub fn new(width: u32, height: u32, size_bytes: u64) -> Self {
        Self {
            width,
            height,
            duration_seconds: None,
            codec: None,
            size_bytes,
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }
}

/// Output of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    #[serde(with = "crate::blob")]
    #[schemars(with = "String")]
    pub blob: Vec<u8>,
    pub metadata: MediaMetadata,
    /// Always true for results produced by the local execution context
    pub processed_locally: bool,
}

impl ProcessingResult {
    /// A result produced by the local execution context.
    pub fn local(blob: Vec<u8>, metadata: MediaMetadata) -> Self {
        Self {
            blob,
            metadata,
            processed_locally: true,
        }
    }
}
