//! Job orchestrator.
//!
//! Turns job submissions into messages on the execution channel and settles
//! each submission's [`JobHandle`] from the messages that come back. Local
//! processing is attempted only when the capability detector allows it;
//! otherwise submissions fail fast with
//! [`OrchestratorError::ClientProcessingUnavailable`] so the caller can take
//! the server path.

use std::sync::Arc;

use tracing::{info, warn};

use vproc_media::{CapabilityDetector, HostProbe};
use vproc_models::{
    CapabilitySnapshot, JobId, JobRequest, JobSnapshot, OptimizeOptions, SourceMedia,
    ThumbnailOptions, TranscodeOptions, WorkerRequest,
};

use crate::channel::{ChannelState, ExecutionChannel, Subscription};
use crate::config::OrchestratorConfig;
use crate::context::{ContextSpawner, LocalContextSpawner};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pending::{JobHandle, PendingTable, ProgressFn};

pub struct JobOrchestrator {
    config: OrchestratorConfig,
    detector: CapabilityDetector,
    channel: ExecutionChannel,
    pending: PendingTable,
    _subscription: Subscription,
}

impl JobOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        detector: CapabilityDetector,
        spawner: Arc<dyn ContextSpawner>,
    ) -> Self {
        let channel = ExecutionChannel::new(spawner, config.init_timeout);
        let pending = PendingTable::new();

        // The handler holds only the table, never the orchestrator
        let routes = pending.clone();
        let subscription = channel.subscribe(Arc::new(move |event| routes.handle_event(event)));

        Self {
            config,
            detector,
            channel,
            pending,
            _subscription: subscription,
        }
    }

    /// Orchestrator that probes this host and runs FFmpeg on a local task.
    pub fn local(config: OrchestratorConfig) -> Self {
        let detector = CapabilityDetector::new(HostProbe::new(
            config.work_dir.clone(),
            config.ffmpeg_binary.clone(),
        ))
        .with_policy(config.policy);
        let spawner = Arc::new(LocalContextSpawner::new(&config));
        Self::new(config, detector, spawner)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn detect_capabilities(&self) -> CapabilitySnapshot {
        self.detector.detect()
    }

    pub fn can_run_locally(&self) -> bool {
        self.detector.can_run_locally()
    }

    pub fn should_prefer_server_fallback(&self) -> bool {
        self.detector
            .should_prefer_server_fallback(&self.detector.detect())
    }

    pub fn is_ready(&self) -> bool {
        self.channel.is_ready()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Open the execution channel if the host can process locally.
    ///
    /// Returns `ClientProcessingUnavailable` without touching the channel
    /// when capability is missing, and `Initialization` when the context
    /// does not come up.
    pub async fn try_initialize(&self) -> OrchestratorResult<()> {
        if self.channel.is_ready() {
            return Ok(());
        }
        if !self.can_run_locally() {
            warn!("Local processing unavailable on this host");
            return Err(OrchestratorError::ClientProcessingUnavailable);
        }
        self.channel.open().await?;
        Ok(())
    }

    /// Like [`try_initialize`](Self::try_initialize), reduced to success.
    pub async fn initialize(&self) -> bool {
        match self.try_initialize().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Orchestrator initialization failed");
                false
            }
        }
    }

    /// Submit a job.
    ///
    /// Initializes lazily. Any capability or initialization failure is
    /// reported as `ClientProcessingUnavailable`.
    pub async fn submit(
        &self,
        request: JobRequest,
        on_progress: Option<ProgressFn>,
    ) -> OrchestratorResult<JobHandle> {
        if let Err(e) = self.try_initialize().await {
            if let OrchestratorError::Initialization(cause) = &e {
                warn!(error = %cause, "Execution context unavailable, rejecting job");
            }
            return Err(OrchestratorError::ClientProcessingUnavailable);
        }

        let id = JobId::new();
        let kind = request.kind();
        let source_bytes = request.source().len();

        // Track before sending so a fast reply always finds its record. The
        // job is bound to this context; only its failure may reject the job.
        let generation = self.channel.generation();
        let handle = self.pending.insert(id.clone(), kind, generation, on_progress);
        JobLogger::new(&id, kind).log_submitted(source_bytes);
        metrics::record_job_submitted(kind);

        if !self.channel.send_on(generation, request.into_wire(id.clone())) {
            self.pending
                .fail_transport(&id, "execution context unavailable");
        }
        Ok(handle)
    }

    pub async fn transcode(
        &self,
        source: SourceMedia,
        options: TranscodeOptions,
        on_progress: Option<ProgressFn>,
    ) -> OrchestratorResult<JobHandle> {
        self.submit(JobRequest::transcode(source, options), on_progress)
            .await
    }

    pub async fn extract_thumbnail(
        &self,
        source: SourceMedia,
        options: ThumbnailOptions,
        on_progress: Option<ProgressFn>,
    ) -> OrchestratorResult<JobHandle> {
        self.submit(JobRequest::thumbnail(source, options), on_progress)
            .await
    }

    pub async fn optimize_image(
        &self,
        source: SourceMedia,
        options: OptimizeOptions,
        on_progress: Option<ProgressFn>,
    ) -> OrchestratorResult<JobHandle> {
        self.submit(JobRequest::optimize(source, options), on_progress)
            .await
    }

    /// Cancel a job. Its handle rejects with `Cancelled` right away; whatever
    /// the context still sends for it is ignored. Returns false for ids that
    /// are not pending.
    pub fn abort(&self, id: &JobId) -> bool {
        if !self.pending.contains(id) {
            return false;
        }
        self.channel.send(WorkerRequest::abort(id.clone()));
        self.pending.cancel(id)
    }

    /// Cancel every pending job. Returns how many were cancelled.
    pub fn abort_all(&self) -> usize {
        for id in self.pending.ids() {
            self.channel.send(WorkerRequest::abort(id));
        }
        self.pending.cancel_all()
    }

    /// Cancel everything and close the channel. Safe to repeat; the
    /// orchestrator can be initialized again afterwards.
    pub fn cleanup(&self) {
        let aborted = self.abort_all();
        self.channel.close();
        if aborted > 0 {
            info!(aborted, "Orchestrator cleaned up");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_jobs(&self) -> Vec<JobSnapshot> {
        self.pending.snapshots()
    }
}

impl Drop for JobOrchestrator {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("channel", &self.channel)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
