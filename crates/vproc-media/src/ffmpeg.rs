//! FFmpeg CLI engine.
//!
//! Working storage is a directory; every name maps to one file directly
//! inside it. FFmpeg runs with that directory as its working directory so
//! commands only ever carry bare file names.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
use crate::engine::{validate_storage_name, ProcessingEngine};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_media, VideoInfo};
use crate::progress::{EngineProgress, EngineProgressFn};

/// Engine backed by the `ffmpeg`/`ffprobe` executables.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg: String,
    ffprobe: String,
    work_dir: PathBuf,
}

impl FfmpegEngine {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            work_dir: work_dir.into(),
        }
    }

    /// Use specific executables instead of the ones on PATH.
    pub fn with_binaries(mut self, ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn path_for(&self, name: &str) -> MediaResult<PathBuf> {
        validate_storage_name(name)?;
        Ok(self.work_dir.join(name))
    }
}

#[async_trait]
impl ProcessingEngine for FfmpegEngine {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn load(&self) -> MediaResult<()> {
        let path = check_ffmpeg(&self.ffmpeg)?;
        fs::create_dir_all(&self.work_dir).await?;
        info!(
            ffmpeg = %path.display(),
            work_dir = %self.work_dir.display(),
            "FFmpeg engine loaded"
        );
        Ok(())
    }

    async fn write_file(&self, name: &str, bytes: &[u8]) -> MediaResult<()> {
        let path = self.path_for(name)?;
        fs::write(&path, bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "Wrote working file");
        Ok(())
    }

    async fn exec(
        &self,
        command: &FfmpegCommand,
        cancel: watch::Receiver<bool>,
        on_progress: EngineProgressFn,
    ) -> MediaResult<()> {
        let input_name = command.input().to_string_lossy().to_string();
        let total_ms = self
            .probe(&input_name)
            .await
            .and_then(|info| info.duration_ms());

        let started = Instant::now();
        let runner = FfmpegRunner::new()
            .with_binary(self.ffmpeg.clone())
            .with_working_dir(self.work_dir.clone())
            .with_cancel(cancel);

        runner
            .run_with_progress(command, move |p| {
                let ratio = if p.is_complete {
                    1.0
                } else {
                    match total_ms {
                        Some(total) => p.percentage(total) / 100.0,
                        // Unknown length: only the final tick is meaningful
                        None => return,
                    }
                };
                on_progress(EngineProgress::new(ratio, started.elapsed()));
            })
            .await
    }

    async fn read_file(&self, name: &str) -> MediaResult<Vec<u8>> {
        let path = self.path_for(name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MediaError::FileNotFound(path))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_file(&self, name: &str) -> MediaResult<()> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn probe(&self, name: &str) -> Option<VideoInfo> {
        let path = self.path_for(name).ok()?;
        match probe_media(&self.ffprobe, &path).await {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Probe failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_storage_round_trip_and_delete() {
        let dir = TempDir::new().unwrap();
        let engine = FfmpegEngine::new(dir.path());

        engine.write_file("job-input.bin", b"abc").await.unwrap();
        assert_eq!(engine.read_file("job-input.bin").await.unwrap(), b"abc");

        engine.delete_file("job-input.bin").await.unwrap();
        assert!(!dir.path().join("job-input.bin").exists());

        // Deleting twice is fine
        engine.delete_file("job-input.bin").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let engine = FfmpegEngine::new(dir.path());
        assert!(matches!(
            engine.read_file("nope.mp4").await,
            Err(MediaError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_names_cannot_escape_work_dir() {
        let dir = TempDir::new().unwrap();
        let engine = FfmpegEngine::new(dir.path());
        assert!(matches!(
            engine.write_file("../escape.txt", b"x").await,
            Err(MediaError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_load_fails_without_binary() {
        let dir = TempDir::new().unwrap();
        let engine =
            FfmpegEngine::new(dir.path()).with_binaries("no-such-ffmpeg-here", "no-such-ffprobe");
        assert!(matches!(
            engine.load().await,
            Err(MediaError::FfmpegNotFound(_))
        ));
    }
}
