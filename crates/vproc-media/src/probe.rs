//! FFprobe media information.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// What the adapter reports back about an output file.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    /// Seconds; 0 for stills
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    /// Codec of the first video stream, empty when unknown
    pub codec: String,
}

impl VideoInfo {
    /// Duration in milliseconds, if the media has one.
    pub fn duration_ms(&self) -> Option<i64> {
        (self.duration > 0.0).then(|| (self.duration * 1000.0) as i64)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

impl ProbeReport {
    fn into_info(self) -> MediaResult<VideoInfo> {
        // Stills show up as single-frame video streams
        let stream = self
            .streams
            .into_iter()
            .find(|s| s.codec_type == "video")
            .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;

        Ok(VideoInfo {
            duration: self
                .format
                .duration
                .and_then(|d| d.parse().ok())
                .unwrap_or(0.0),
            width: stream.width.unwrap_or(0),
            height: stream.height.unwrap_or(0),
            codec: stream.codec_name.unwrap_or_default(),
        })
    }
}

/// Probe a media file with the given ffprobe executable.
pub async fn probe_media(ffprobe: &str, path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    which::which(ffprobe).map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe exited with {}", output.status),
            stderr: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
        });
    }

    parse_report(&output.stdout)
}

fn parse_report(stdout: &[u8]) -> MediaResult<VideoInfo> {
    serde_json::from_slice::<ProbeReport>(stdout)?.into_info()
}
