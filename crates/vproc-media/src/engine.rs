//! The processing engine seen from the adapter.
//!
//! An engine owns a flat working storage addressed by file name. The adapter
//! writes the source into it, runs one command, reads the output back, and
//! deletes what it created. Any engine with this shape can sit behind
//! [`EngineWorker`](crate::adapter::EngineWorker).

use async_trait::async_trait;
use tokio::sync::watch;

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::probe::VideoInfo;
use crate::progress::EngineProgressFn;

#[async_trait]
pub trait ProcessingEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Prepare the engine. Called once per execution context, during the
    /// initialization handshake.
    async fn load(&self) -> MediaResult<()>;

    /// Store `bytes` under `name` in working storage.
    async fn write_file(&self, name: &str, bytes: &[u8]) -> MediaResult<()>;

    /// Run a command whose input and output are working storage names.
    ///
    /// Implementations stop early with [`MediaError::Cancelled`] once `cancel`
    /// flips to `true`.
    async fn exec(
        &self,
        command: &FfmpegCommand,
        cancel: watch::Receiver<bool>,
        on_progress: EngineProgressFn,
    ) -> MediaResult<()>;

    /// Read a file back from working storage.
    async fn read_file(&self, name: &str) -> MediaResult<Vec<u8>>;

    /// Remove a file from working storage. Missing files are not an error.
    async fn delete_file(&self, name: &str) -> MediaResult<()>;

    /// Inspect a stored file. Engines that cannot probe return `None`.
    async fn probe(&self, _name: &str) -> Option<VideoInfo> {
        None
    }
}

/// Reject names that would escape a flat working storage.
pub fn validate_storage_name(name: &str) -> MediaResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(MediaError::InvalidName(name.to_string()));
    }
    Ok(())
}
