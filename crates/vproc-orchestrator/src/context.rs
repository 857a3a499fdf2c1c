//! Execution contexts.
//!
//! An execution context is reachable only through two unbounded streams:
//! [`WorkerRequest`]s go in, [`ContextEvent`]s come out. Nothing else is
//! shared with the caller. Dropping the request sender is the signal to
//! shut down; a context then stops its jobs, releases their storage and
//! exits, which ends the event stream.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{error, info};

use vproc_media::{EngineWorker, FfmpegEngine};
use vproc_models::{WorkerRequest, WorkerResponse};

use crate::config::OrchestratorConfig;
use crate::error::ChannelError;

/// What an execution context reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    Message(WorkerResponse),
    /// The context can no longer be trusted to answer
    TransportError(String),
}

/// The caller's ends of a running execution context.
#[derive(Debug)]
pub struct ContextHandle {
    pub requests: mpsc::UnboundedSender<WorkerRequest>,
    pub events: mpsc::UnboundedReceiver<ContextEvent>,
}

impl ContextHandle {
    pub fn new(
        requests: mpsc::UnboundedSender<WorkerRequest>,
        events: mpsc::UnboundedReceiver<ContextEvent>,
    ) -> Self {
        Self { requests, events }
    }
}

/// Starts execution contexts.
pub trait ContextSpawner: Send + Sync {
    /// Start a fresh context. Called once per initialization attempt.
    fn spawn(&self) -> Result<ContextHandle, ChannelError>;
}

/// Runs an [`EngineWorker`] over an [`FfmpegEngine`] on its own tokio task.
#[derive(Debug, Clone)]
pub struct LocalContextSpawner {
    work_dir: PathBuf,
    ffmpeg_binary: String,
    ffprobe_binary: String,
    max_concurrent_jobs: usize,
}

impl LocalContextSpawner {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            ffmpeg_binary: config.ffmpeg_binary.clone(),
            ffprobe_binary: config.ffprobe_binary.clone(),
            max_concurrent_jobs: config.max_concurrent_jobs,
        }
    }
}

impl ContextSpawner for LocalContextSpawner {
    fn spawn(&self) -> Result<ContextHandle, ChannelError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ChannelError::spawn_failed(e.to_string()))?;

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<WorkerResponse>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let engine = FfmpegEngine::new(self.work_dir.clone())
            .with_binaries(self.ffmpeg_binary.clone(), self.ffprobe_binary.clone());
        let worker = EngineWorker::new(Arc::new(engine), self.max_concurrent_jobs);

        let panic_tx = event_tx.clone();
        runtime.spawn(async move {
            let forward = async move {
                while let Some(response) = response_rx.recv().await {
                    if event_tx.send(ContextEvent::Message(response)).is_err() {
                        break;
                    }
                }
            };
            let serve = async move {
                if let Err(panic) = AssertUnwindSafe(worker.run(request_rx, response_tx))
                    .catch_unwind()
                    .await
                {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(reason = %reason, "Execution context panicked");
                    let _ = panic_tx.send(ContextEvent::TransportError(format!(
                        "execution context panicked: {}",
                        reason
                    )));
                }
            };
            tokio::join!(serve, forward);
            info!("Execution context exited");
        });

        Ok(ContextHandle::new(request_tx, event_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_spawn_outside_runtime_fails() {
        let spawner = LocalContextSpawner::new(&OrchestratorConfig::default());
        assert!(matches!(
            spawner.spawn(),
            Err(ChannelError::SpawnFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_local_context_answers_init_and_exits_on_close() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = OrchestratorConfig::default().with_work_dir(dir.path());
        config.ffmpeg_binary = "definitely-not-ffmpeg".to_string();

        let ContextHandle {
            requests,
            mut events,
        } = LocalContextSpawner::new(&config).spawn().unwrap();

        requests.send(WorkerRequest::init()).unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match reply {
            ContextEvent::Message(WorkerResponse::Error { id, .. }) => assert!(id.is_init()),
            other => panic!("Expected init error, got {other:?}"),
        }

        drop(requests);
        let end = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap();
        assert!(end.is_none());
    }
}
