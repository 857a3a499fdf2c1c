//! FFmpeg invocation.
//!
//! [`FfmpegCommand`] collects arguments for one input and one output;
//! [`FfmpegRunner`] executes it, streams progress and kills the process when
//! the job is cancelled.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::progress::{FfmpegProgress, ProgressParser};

/// Trailing non-progress stderr lines attached to failures.
const STDERR_TAIL_LINES: usize = 8;

/// Arguments for a single-input, single-output FFmpeg run.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Placed before `-i`
    before_input: Vec<String>,
    /// Placed between `-i <input>` and the output
    after_input: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            before_input: Vec::new(),
            after_input: Vec::new(),
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.after_input.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after_input.extend(args.into_iter().map(Into::into));
        self
    }

    fn option(self, flag: &str, value: impl Into<String>) -> Self {
        self.output_arg(flag).output_arg(value)
    }

    /// Input-side seek, so the demuxer skips ahead instead of decoding.
    pub fn seek(mut self, seconds: f64) -> Self {
        self.before_input.push("-ss".to_string());
        self.before_input.push(format!("{:.3}", seconds));
        self
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.option("-vf", filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.option("-c:v", codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.option("-c:a", codec)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.option("-crf", crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.option("-preset", preset)
    }

    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.option("-b:a", bitrate)
    }

    pub fn single_frame(self) -> Self {
        self.option("-frames:v", "1")
    }

    /// Full argument list, without the executable.
    pub fn build_args(&self) -> Vec<String> {
        const PREAMBLE: [&str; 6] = ["-y", "-v", "error", "-progress", "pipe:2", "-nostats"];

        PREAMBLE
            .iter()
            .map(|s| s.to_string())
            .chain(self.before_input.iter().cloned())
            .chain(["-i".to_string(), self.input.to_string_lossy().into_owned()])
            .chain(self.after_input.iter().cloned())
            .chain(std::iter::once(self.output.to_string_lossy().into_owned()))
            .collect()
    }
}

/// Executes [`FfmpegCommand`]s.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    binary: String,
    working_dir: Option<PathBuf>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            working_dir: None,
            cancel: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Relative input/output paths resolve against `dir`.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Kill the process once `cancel` flips to `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, on_progress: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        check_ffmpeg(&self.binary)?;

        let args = cmd.build_args();
        debug!(binary = %self.binary, args = %args.join(" "), "Running FFmpeg");

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;
        let reader = tokio::spawn(drain_stderr(BufReader::new(stderr).lines(), on_progress));

        let outcome = self.wait(&mut child).await;
        let tail = reader.await.unwrap_or_default();

        outcome.map_err(|e| match e {
            MediaError::FfmpegFailed {
                message, exit_code, ..
            } => MediaError::ffmpeg_failed(message, Some(tail), exit_code),
            other => other,
        })
    }

    async fn wait(&self, child: &mut Child) -> MediaResult<()> {
        let status = match self.cancel.clone() {
            None => child.wait().await?,
            Some(mut cancel) => loop {
                if *cancel.borrow_and_update() {
                    info!("FFmpeg cancelled, killing process");
                    let _ = child.kill().await;
                    return Err(MediaError::Cancelled);
                }
                tokio::select! {
                    status = child.wait() => break status?,
                    changed = cancel.changed() => {
                        if changed.is_err() {
                            // Nobody left to cancel
                            break child.wait().await?;
                        }
                    }
                }
            },
        };

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                None,
                status.code(),
            ))
        }
    }
}

/// Route progress lines to `on_progress` and return the last few other lines.
async fn drain_stderr<F>(mut lines: Lines<BufReader<ChildStderr>>, on_progress: F) -> String
where
    F: Fn(FfmpegProgress),
{
    let mut parser = ProgressParser::new();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        if ProgressParser::is_progress_line(&line) {
            if let Some(tick) = parser.feed(&line) {
                on_progress(tick);
            }
        } else if !line.trim().is_empty() {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }

    Vec::from(tail).join("\n")
}

/// Resolve an FFmpeg executable on PATH.
pub fn check_ffmpeg(binary: &str) -> MediaResult<PathBuf> {
    which::which(binary).map_err(|_| MediaError::FfmpegNotFound(binary.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_goes_before_input() {
        let args = FfmpegCommand::new("input.mp4", "output.mp4")
            .seek(10.0)
            .video_codec("libx264")
            .crf(18)
            .build_args();

        assert_eq!(&args[..6], ["-y", "-v", "error", "-progress", "pipe:2", "-nostats"]);
        assert_eq!(args.last().map(String::as_str), Some("output.mp4"));

        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[ss + 1], "10.000");
        assert!(ss < i);
        assert_eq!(args[i + 1], "input.mp4");

        let crf = args.iter().position(|a| a == "-crf").unwrap();
        assert!(crf > i);
        assert_eq!(args[crf + 1], "18");
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");
        let err = FfmpegRunner::new()
            .with_binary("definitely-not-an-ffmpeg-binary")
            .run(&cmd)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FfmpegNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_before_start_is_reported() {
        // Cancellation wins only when a real binary exists; otherwise the
        // lookup fails first
        if check_ffmpeg("ffmpeg").is_err() {
            return;
        }
        let (tx, rx) = watch::channel(true);
        let dir = tempfile::TempDir::new().unwrap();
        let err = FfmpegRunner::new()
            .with_working_dir(dir.path())
            .with_cancel(rx)
            .run(&FfmpegCommand::new("missing.mp4", "out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
        drop(tx);
    }
}
