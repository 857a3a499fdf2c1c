//! Caller-facing session.
//!
//! A [`ProcessingSession`] wraps an orchestrator with the observable state a
//! UI or CLI needs: phase, last progress, last error. State changes are
//! published through a `tokio::sync::watch` channel.
//!
//! A session built with [`ProcessingSession::new`] owns its orchestrator and
//! tears it down on close. One built with [`ProcessingSession::attached`]
//! borrows a shared orchestrator and on close only aborts its own job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use vproc_models::{
    CapabilitySnapshot, JobId, JobRequest, OptimizeOptions, ProcessingResult, SourceMedia,
    ThumbnailOptions, TranscodeOptions,
};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::orchestrator::JobOrchestrator;
use crate::pending::ProgressFn;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Initializing,
    Ready,
    /// Local processing is not possible; use the server path
    Unavailable,
    Processing,
}

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    /// Last progress reported for the current job (0-100)
    pub progress: u8,
    pub stage: Option<String>,
    /// Message of the last failure; cleared when a new operation starts
    pub error: Option<String>,
    pub current_job: Option<JobId>,
}

pub struct ProcessingSession {
    orchestrator: Arc<JobOrchestrator>,
    state: Arc<watch::Sender<SessionState>>,
    /// Whether close tears the orchestrator down
    owns_orchestrator: bool,
    closed: AtomicBool,
}

impl ProcessingSession {
    /// Session that owns `orchestrator` and cleans it up on close.
    pub fn new(orchestrator: Arc<JobOrchestrator>) -> Self {
        Self::build(orchestrator, true)
    }

    /// Session over an orchestrator other sessions may be using. Closing it
    /// aborts its own job and leaves the orchestrator running.
    pub fn attached(orchestrator: Arc<JobOrchestrator>) -> Self {
        Self::build(orchestrator, false)
    }

    fn build(orchestrator: Arc<JobOrchestrator>, owns_orchestrator: bool) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            orchestrator,
            state: Arc::new(state),
            owns_orchestrator,
            closed: AtomicBool::new(false),
        }
    }

    pub fn owns_orchestrator(&self) -> bool {
        self.owns_orchestrator
    }

    pub fn orchestrator(&self) -> &Arc<JobOrchestrator> {
        &self.orchestrator
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Follow state changes.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.borrow().phase
    }

    pub fn is_initializing(&self) -> bool {
        self.phase() == SessionPhase::Initializing
    }

    pub fn is_processing(&self) -> bool {
        self.phase() == SessionPhase::Processing
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.phase(), SessionPhase::Ready | SessionPhase::Processing)
    }

    pub fn progress(&self) -> u8 {
        self.state.borrow().progress
    }

    pub fn stage(&self) -> Option<String> {
        self.state.borrow().stage.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn capabilities(&self) -> CapabilitySnapshot {
        self.orchestrator.detect_capabilities()
    }

    pub fn can_run_locally(&self) -> bool {
        self.orchestrator.can_run_locally()
    }

    pub fn should_prefer_server_fallback(&self) -> bool {
        self.orchestrator.should_prefer_server_fallback()
    }

    /// Bring the orchestrator up. Returns whether local processing is ready.
    pub async fn initialize(&self) -> bool {
        self.state.send_modify(|s| {
            s.phase = SessionPhase::Initializing;
            s.error = None;
        });

        match self.orchestrator.try_initialize().await {
            Ok(()) => {
                self.state.send_modify(|s| s.phase = SessionPhase::Ready);
                true
            }
            Err(e) => {
                self.record_failure(&e);
                false
            }
        }
    }

    pub async fn transcode(
        &self,
        source: SourceMedia,
        options: TranscodeOptions,
    ) -> OrchestratorResult<ProcessingResult> {
        self.run(JobRequest::transcode(source, options)).await
    }

    pub async fn extract_thumbnail(
        &self,
        source: SourceMedia,
        options: ThumbnailOptions,
    ) -> OrchestratorResult<ProcessingResult> {
        self.run(JobRequest::thumbnail(source, options)).await
    }

    pub async fn optimize_image(
        &self,
        source: SourceMedia,
        options: OptimizeOptions,
    ) -> OrchestratorResult<ProcessingResult> {
        self.run(JobRequest::optimize(source, options)).await
    }

    async fn run(&self, request: JobRequest) -> OrchestratorResult<ProcessingResult> {
        self.state.send_modify(|s| {
            s.phase = SessionPhase::Processing;
            s.progress = 0;
            s.stage = None;
            s.error = None;
        });

        let state = Arc::clone(&self.state);
        let on_progress: ProgressFn = Arc::new(move |percent, stage| {
            state.send_modify(|s| {
                s.progress = percent;
                s.stage = Some(stage.to_string());
            });
        });

        let handle = match self.orchestrator.submit(request, Some(on_progress)).await {
            Ok(handle) => handle,
            Err(e) => {
                self.record_failure(&e);
                return Err(e);
            }
        };
        let id = handle.id().clone();
        self.state
            .send_modify(|s| s.current_job = Some(id.clone()));

        let outcome = handle.await;
        match &outcome {
            Ok(_) => self.state.send_modify(|s| {
                if s.current_job.as_ref() == Some(&id) {
                    s.current_job = None;
                }
                s.phase = SessionPhase::Ready;
                s.progress = 100;
            }),
            Err(e) => {
                self.state.send_modify(|s| {
                    if s.current_job.as_ref() == Some(&id) {
                        s.current_job = None;
                    }
                });
                self.record_failure(e);
            }
        }
        outcome
    }

    /// Phase to settle in when no job is running. A closed session stays idle.
    fn resting_phase(&self) -> SessionPhase {
        if !self.closed.load(Ordering::SeqCst) && self.orchestrator.is_ready() {
            SessionPhase::Ready
        } else {
            SessionPhase::Idle
        }
    }

    fn record_failure(&self, error: &OrchestratorError) {
        let resting = self.resting_phase();
        self.state.send_modify(|s| {
            if error.is_cancelled() {
                s.phase = resting;
                return;
            }
            s.error = Some(error.to_string());
            s.phase = if error.is_unavailable() {
                SessionPhase::Unavailable
            } else {
                resting
            };
        });
    }

    /// Abort the current job, if any.
    pub fn abort(&self) -> bool {
        let current = self.state.borrow().current_job.clone();
        match current {
            Some(id) => self.orchestrator.abort(&id),
            None => false,
        }
    }

    /// Abort the current job and clear progress and error.
    pub fn reset(&self) {
        self.abort();
        let phase = self.resting_phase();
        self.state.send_replace(SessionState {
            phase,
            ..SessionState::default()
        });
    }

    /// Close the session. An owning session tears the orchestrator down; an
    /// attached one aborts only its current job. Only the first call does
    /// anything.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(owns_orchestrator = self.owns_orchestrator, "Closing processing session");
        if self.owns_orchestrator {
            self.orchestrator.cleanup();
        } else {
            self.abort();
        }
        self.state.send_modify(|s| {
            s.phase = SessionPhase::Idle;
            s.current_job = None;
        });
    }
}

impl Drop for ProcessingSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ProcessingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingSession")
            .field("state", &*self.state.borrow())
            .field("owns_orchestrator", &self.owns_orchestrator)
            .finish_non_exhaustive()
    }
}
