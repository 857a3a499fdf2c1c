//! Processing engine adapter.
//!
//! [`EngineWorker`] is the main loop of an execution context. It owns one
//! [`ProcessingEngine`], answers the init handshake, and runs every job on
//! its own task so that `abort` messages are handled while jobs are in
//! flight. Each job moves through the same steps:
//!
//! 1. write the source into working storage
//! 2. build the FFmpeg command from the job options
//! 3. execute it, forwarding progress
//! 4. read the output back and describe it
//!
//! The abort flag is checked between steps and the engine watches it during
//! execution. Working storage for a job is released on every exit path, and
//! an aborted job sends nothing back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use metrics::histogram;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use vproc_models::{JobId, MediaMetadata, SourceMedia, WorkerRequest, WorkerResponse};

use crate::engine::ProcessingEngine;
use crate::error::{MediaError, MediaResult};
use crate::operations::Operation;
use crate::progress::{EngineProgress, EngineProgressFn};

/// Stage reported before the engine starts producing progress.
pub const PREPARING_STAGE: &str = "preparing";

/// Extension used for sources whose name has none.
const FALLBACK_INPUT_EXTENSION: &str = "bin";

/// Time spent inside `exec`, by job kind.
pub const ENGINE_EXEC_DURATION_SECONDS: &str = "vproc_engine_exec_duration_seconds";

type AbortFlags = Arc<Mutex<HashMap<JobId, watch::Sender<bool>>>>;

fn lock_flags(flags: &AbortFlags) -> MutexGuard<'_, HashMap<JobId, watch::Sender<bool>>> {
    flags.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Working storage names for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFiles {
    pub input: String,
    pub output: String,
}

impl JobFiles {
    pub fn new(id: &JobId, source: &SourceMedia, operation: &Operation) -> Self {
        let input_ext = source
            .extension()
            .unwrap_or_else(|| FALLBACK_INPUT_EXTENSION.to_string());
        Self {
            input: format!("{}-input.{}", id, input_ext),
            output: format!("{}-output.{}", id, operation.output_extension()),
        }
    }
}

/// Removes a job's abort flag when the job task ends, however it ends.
struct ActiveJob {
    id: JobId,
    flags: AbortFlags,
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        lock_flags(&self.flags).remove(&self.id);
    }
}

/// Execution-context main loop around a processing engine.
pub struct EngineWorker {
    engine: Arc<dyn ProcessingEngine>,
    job_semaphore: Arc<Semaphore>,
    abort_flags: AbortFlags,
    loaded: bool,
}

impl EngineWorker {
    pub fn new(engine: Arc<dyn ProcessingEngine>, max_concurrent_jobs: usize) -> Self {
        Self {
            engine,
            job_semaphore: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            abort_flags: Arc::new(Mutex::new(HashMap::new())),
            loaded: false,
        }
    }

    /// Serve requests until the request stream closes.
    ///
    /// Closing the stream aborts every running job; the call returns once
    /// their working storage has been released.
    pub async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
        responses: mpsc::UnboundedSender<WorkerResponse>,
    ) {
        info!(engine = self.engine.name(), "Engine worker started");
        let mut jobs = JoinSet::new();

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle(request, &mut jobs, &responses).await,
                    None => break,
                },
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    if let Err(e) = joined {
                        error!("Job task failed: {}", e);
                    }
                }
            }
        }

        let running = self.abort_all();
        if running > 0 {
            info!(running, "Request stream closed, aborting running jobs");
        }
        while jobs.join_next().await.is_some() {}
        info!(engine = self.engine.name(), "Engine worker stopped");
    }

    async fn handle(
        &mut self,
        request: WorkerRequest,
        jobs: &mut JoinSet<()>,
        responses: &mpsc::UnboundedSender<WorkerResponse>,
    ) {
        let (id, source, operation) = match request {
            WorkerRequest::Init { .. } => {
                let reply = match self.engine.load().await {
                    Ok(()) => {
                        self.loaded = true;
                        WorkerResponse::ready()
                    }
                    Err(e) => {
                        warn!(engine = self.engine.name(), error = %e, "Engine failed to load");
                        WorkerResponse::error(JobId::init(), e.wire_message())
                    }
                };
                let _ = responses.send(reply);
                return;
            }
            WorkerRequest::Abort { id } => {
                self.abort(&id);
                return;
            }
            WorkerRequest::Transcode { id, payload } => {
                (id, payload.source, Operation::Transcode(payload.options))
            }
            WorkerRequest::Thumbnail { id, payload } => {
                (id, payload.source, Operation::Thumbnail(payload.options))
            }
            WorkerRequest::Optimize { id, payload } => {
                (id, payload.source, Operation::Optimize(payload.options))
            }
        };

        if !self.loaded {
            let _ = responses.send(WorkerResponse::error(id, "Engine not loaded"));
            return;
        }

        let (abort_tx, abort_rx) = watch::channel(false);
        {
            let mut flags = lock_flags(&self.abort_flags);
            if flags.contains_key(&id) {
                drop(flags);
                warn!(job_id = %id, "Duplicate job id");
                let _ = responses.send(WorkerResponse::error(id, "Duplicate job id"));
                return;
            }
            flags.insert(id.clone(), abort_tx);
        }

        let job = JobRun {
            _active: ActiveJob {
                id: id.clone(),
                flags: Arc::clone(&self.abort_flags),
            },
            id: id.clone(),
            source,
            operation,
            abort_rx,
            engine: Arc::clone(&self.engine),
            semaphore: Arc::clone(&self.job_semaphore),
            responses: responses.clone(),
        };

        let span = tracing::info_span!("engine_job", job_id = %id);
        jobs.spawn(job.run().instrument(span));
    }

    fn abort(&self, id: &JobId) {
        match lock_flags(&self.abort_flags).get(id) {
            Some(flag) => {
                info!(job_id = %id, "Aborting job");
                flag.send_replace(true);
            }
            None => debug!(job_id = %id, "Abort for unknown job ignored"),
        }
    }

    fn abort_all(&self) -> usize {
        let flags = lock_flags(&self.abort_flags);
        for flag in flags.values() {
            flag.send_replace(true);
        }
        flags.len()
    }
}

/// One job on its own task.
struct JobRun {
    _active: ActiveJob,
    id: JobId,
    source: SourceMedia,
    operation: Operation,
    abort_rx: watch::Receiver<bool>,
    engine: Arc<dyn ProcessingEngine>,
    semaphore: Arc<Semaphore>,
    responses: mpsc::UnboundedSender<WorkerResponse>,
}

impl JobRun {
    async fn run(self) {
        let _permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let _ = self
                    .responses
                    .send(WorkerResponse::error(self.id.clone(), "Engine shutting down"));
                return;
            }
        };
        if self.is_aborted() {
            debug!("Job aborted before start");
            return;
        }

        let files = JobFiles::new(&self.id, &self.source, &self.operation);
        let started = Instant::now();
        let outcome = self.process(&files).await;

        // Release working storage on every path
        for name in [&files.input, &files.output] {
            if let Err(e) = self.engine.delete_file(name).await {
                warn!(file = %name, error = %e, "Failed to release working file");
            }
        }

        if self.is_aborted() {
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Job aborted, nothing sent"
            );
            return;
        }

        let reply = match outcome {
            Ok((blob, metadata)) => {
                info!(
                    kind = %self.operation.kind(),
                    bytes = blob.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job complete"
                );
                WorkerResponse::complete(self.id.clone(), blob, metadata)
            }
            Err(MediaError::Cancelled) => return,
            Err(e) => {
                warn!(kind = %self.operation.kind(), error = %e, "Job failed");
                WorkerResponse::error(self.id.clone(), e.wire_message())
            }
        };
        let _ = self.responses.send(reply);
    }

    async fn process(&self, files: &JobFiles) -> MediaResult<(Vec<u8>, MediaMetadata)> {
        let kind = self.operation.kind();
        self.send_progress(0, PREPARING_STAGE);

        self.engine
            .write_file(&files.input, &self.source.bytes)
            .await?;
        self.check_abort()?;

        let command = self.operation.build_command(&files.input, &files.output);
        self.check_abort()?;

        let responses = self.responses.clone();
        let id = self.id.clone();
        let on_progress: EngineProgressFn = Arc::new(move |p: EngineProgress| {
            let _ = responses.send(WorkerResponse::progress(
                id.clone(),
                p.percent(),
                kind.stage(),
            ));
        });

        let exec_started = Instant::now();
        self.engine
            .exec(&command, self.abort_rx.clone(), on_progress)
            .await?;
        let labels = [("kind", kind.as_str().to_string())];
        histogram!(ENGINE_EXEC_DURATION_SECONDS, &labels)
            .record(exec_started.elapsed().as_secs_f64());
        self.check_abort()?;

        let blob = self.engine.read_file(&files.output).await?;
        let metadata = self.describe(&files.output, blob.len() as u64).await;
        Ok((blob, metadata))
    }

    /// Probe the output, falling back to the requested dimensions.
    async fn describe(&self, output: &str, size: u64) -> MediaMetadata {
        match self.engine.probe(output).await {
            Some(info) => {
                let mut metadata = MediaMetadata::new(info.width, info.height, size);
                if info.duration > 0.0 {
                    metadata = metadata.with_duration(info.duration);
                }
                if !info.codec.is_empty() {
                    metadata = metadata.with_codec(info.codec);
                }
                metadata
            }
            None => {
                let (width, height) = self.operation.nominal_dimensions();
                MediaMetadata::new(width, height, size)
            }
        }
    }

    fn send_progress(&self, percent: u8, stage: &str) {
        let _ = self
            .responses
            .send(WorkerResponse::progress(self.id.clone(), percent, stage));
    }

    fn is_aborted(&self) -> bool {
        *self.abort_rx.borrow()
    }

    fn check_abort(&self) -> MediaResult<()> {
        if self.is_aborted() {
            Err(MediaError::Cancelled)
        } else {
            Ok(())
        }
    }
}
