//! Progress reporting.
//!
//! FFmpeg runs with `-progress pipe:2`, which interleaves `key=value` blocks
//! with its normal stderr output. [`ProgressParser`] folds those lines into
//! [`FfmpegProgress`] snapshots; everything else is left to the caller.

use std::sync::Arc;
use std::time::Duration;

/// One `-progress` block, emitted on every `progress=` line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FfmpegProgress {
    pub frame: u64,
    /// Output position in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed relative to realtime (1.5 = 1.5x)
    pub speed: f64,
    /// Set on the final `progress=end` block
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Percentage of `total_duration_ms` written so far, 0-100.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        (self.out_time_ms as f64 * 100.0 / total_duration_ms as f64).clamp(0.0, 100.0)
    }
}

/// Incremental parser for the `-progress` key/value stream.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: FfmpegProgress,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a stderr line belongs to the progress stream.
    pub fn is_progress_line(line: &str) -> bool {
        let Some((key, _)) = line.trim().split_once('=') else {
            return false;
        };
        key.starts_with("stream_")
            || matches!(
                key,
                "frame"
                    | "fps"
                    | "bitrate"
                    | "total_size"
                    | "out_time_us"
                    | "out_time_ms"
                    | "out_time"
                    | "dup_frames"
                    | "drop_frames"
                    | "speed"
                    | "progress"
            )
    }

    /// Feed one line. Returns a snapshot when the line closes a block.
    pub fn feed(&mut self, line: &str) -> Option<FfmpegProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        match key {
            // Both carry microseconds
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.current.out_time_ms = us / 1000;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.current.frame = frame;
                }
            }
            "speed" => {
                // "1.5x" or "N/A"
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.parse().ok()) {
                    self.current.speed = speed;
                }
            }
            "progress" => {
                self.current.is_complete = value == "end";
                return Some(self.current.clone());
            }
            _ => {}
        }
        None
    }
}

/// Engine-neutral progress tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineProgress {
    /// Fraction of the operation done, 0.0..=1.0
    pub ratio: f64,
    /// Wall time since the operation started
    pub elapsed: Duration,
}

impl EngineProgress {
    pub fn new(ratio: f64, elapsed: Duration) -> Self {
        Self {
            ratio: if ratio.is_finite() {
                ratio.clamp(0.0, 1.0)
            } else {
                0.0
            },
            elapsed,
        }
    }

    /// Whole percent, 0-100.
    pub fn percent(&self) -> u8 {
        (self.ratio * 100.0).round() as u8
    }
}

/// Callback type for engine progress updates.
pub type EngineProgressFn = Arc<dyn Fn(EngineProgress) + Send + Sync>;
