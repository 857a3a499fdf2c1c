//! Pending-job table and job handles.
//!
//! The table maps each in-flight job id to the one-shot sender that settles
//! its [`JobHandle`]. Whoever removes a record settles it, so every job has
//! at most one terminal transition and anything arriving for an id that is
//! no longer in the table is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::trace;

use vproc_models::{
    JobId, JobKind, JobSnapshot, JobState, ProcessingResult, WorkerResponse,
};

use crate::channel::ChannelEvent;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Progress callback: `(percent, stage)`.
pub type ProgressFn = Arc<dyn Fn(u8, &str) + Send + Sync>;

type Completion = oneshot::Sender<OrchestratorResult<ProcessingResult>>;

struct PendingJob {
    completion: Completion,
    on_progress: Option<ProgressFn>,
    logger: JobLogger,
    kind: JobKind,
    /// Channel generation the job was sent on
    generation: u64,
    submitted_at: DateTime<Utc>,
    state: JobState,
    progress: u8,
    stage: Option<String>,
}

impl PendingJob {
    fn settle(self, outcome: OrchestratorResult<ProcessingResult>) {
        // Receiver may be gone if the caller dropped the handle
        let _ = self.completion.send(outcome);
    }

    fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.submitted_at).num_milliseconds()
    }
}

/// Shared table of in-flight jobs.
#[derive(Clone, Default)]
pub struct PendingTable {
    jobs: Arc<Mutex<HashMap<JobId, PendingJob>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, PendingJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take(&self, id: &JobId) -> Option<PendingJob> {
        let mut jobs = self.lock();
        let job = jobs.remove(id);
        metrics::set_jobs_pending(jobs.len());
        job
    }

    fn drain(&self) -> Vec<PendingJob> {
        let mut jobs = self.lock();
        let drained: Vec<_> = jobs.drain().map(|(_, job)| job).collect();
        metrics::set_jobs_pending(0);
        drained
    }

    /// Track a new job sent on channel `generation`. The returned handle
    /// settles when the job does.
    pub fn insert(
        &self,
        id: JobId,
        kind: JobKind,
        generation: u64,
        on_progress: Option<ProgressFn>,
    ) -> JobHandle {
        let (completion, receiver) = oneshot::channel();
        let job = PendingJob {
            completion,
            on_progress,
            logger: JobLogger::new(&id, kind),
            kind,
            generation,
            submitted_at: Utc::now(),
            state: JobState::Pending,
            progress: 0,
            stage: None,
        };
        let mut jobs = self.lock();
        jobs.insert(id.clone(), job);
        metrics::set_jobs_pending(jobs.len());
        JobHandle {
            id,
            kind,
            receiver,
        }
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.lock().keys().cloned().collect()
    }

    /// Record progress and invoke the job's callback. Returns false when the
    /// id is not pending.
    pub fn progress(&self, id: &JobId, percent: u8, stage: &str) -> bool {
        let callback = {
            let mut jobs = self.lock();
            let Some(job) = jobs.get_mut(id) else {
                trace!(job_id = %id, "Progress for unknown job dropped");
                return false;
            };
            job.state = JobState::Running;
            job.progress = percent;
            job.stage = Some(stage.to_string());
            job.logger.log_progress(percent, stage);
            job.on_progress.clone()
        };
        if let Some(callback) = callback {
            callback(percent, stage);
        }
        true
    }

    /// Resolve a job with its result.
    pub fn complete(&self, id: &JobId, result: ProcessingResult) -> bool {
        let Some(job) = self.take(id) else {
            trace!(job_id = %id, "Completion for unknown job dropped");
            return false;
        };
        job.logger
            .log_completion(result.metadata.size_bytes, job.elapsed_ms());
        metrics::record_job_completed(job.kind);
        job.settle(Ok(result));
        true
    }

    /// Reject a job with the engine's error message.
    pub fn fail(&self, id: &JobId, message: &str) -> bool {
        let Some(job) = self.take(id) else {
            trace!(job_id = %id, "Error for unknown job dropped");
            return false;
        };
        job.logger.log_error(message);
        metrics::record_job_failed(job.kind);
        job.settle(Err(OrchestratorError::job(message)));
        true
    }

    /// Reject a job as cancelled by the caller.
    pub fn cancel(&self, id: &JobId) -> bool {
        let Some(job) = self.take(id) else {
            return false;
        };
        job.logger.log_aborted();
        metrics::record_jobs_aborted(1);
        job.settle(Err(OrchestratorError::Cancelled));
        true
    }

    /// Reject every job as cancelled. Returns how many there were.
    pub fn cancel_all(&self) -> usize {
        let jobs = self.drain();
        let count = jobs.len();
        for job in jobs {
            job.logger.log_aborted();
            job.settle(Err(OrchestratorError::Cancelled));
        }
        if count > 0 {
            metrics::record_jobs_aborted(count);
        }
        count
    }

    /// Reject one job with a transport error.
    pub fn fail_transport(&self, id: &JobId, reason: &str) -> bool {
        let Some(job) = self.take(id) else {
            return false;
        };
        job.logger.log_transport_failure(reason);
        metrics::record_job_failed(job.kind);
        job.settle(Err(OrchestratorError::transport(reason)));
        true
    }

    /// Reject every job sent on `generation` or earlier with a transport
    /// error. Jobs already sent to a newer context are left alone.
    pub fn fail_generation(&self, generation: u64, reason: &str) -> usize {
        let lost: Vec<PendingJob> = {
            let mut jobs = self.lock();
            let ids: Vec<JobId> = jobs
                .iter()
                .filter(|(_, job)| job.generation <= generation)
                .map(|(id, _)| id.clone())
                .collect();
            let lost = ids.iter().filter_map(|id| jobs.remove(id)).collect();
            metrics::set_jobs_pending(jobs.len());
            lost
        };
        let count = lost.len();
        for job in lost {
            job.logger.log_transport_failure(reason);
            metrics::record_job_failed(job.kind);
            job.settle(Err(OrchestratorError::transport(reason)));
        }
        count
    }

    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        let mut snapshots: Vec<JobSnapshot> = self
            .lock()
            .iter()
            .map(|(id, job)| JobSnapshot {
                id: id.clone(),
                kind: job.kind,
                state: job.state,
                progress_percent: job.progress,
                stage: job.stage.clone(),
                submitted_at: job.submitted_at,
            })
            .collect();
        snapshots.sort_by_key(|s| s.submitted_at);
        snapshots
    }

    /// Route one channel event to the job it belongs to.
    pub fn handle_event(&self, event: &ChannelEvent) {
        match event {
            ChannelEvent::Message(message) => match message {
                WorkerResponse::Progress {
                    id,
                    progress,
                    stage,
                } => {
                    self.progress(id, *progress, stage);
                }
                WorkerResponse::Complete {
                    id,
                    result,
                    metadata,
                } => {
                    // Check first so a stale completion never copies its blob
                    if self.contains(id) {
                        self.complete(
                            id,
                            ProcessingResult::local(result.clone(), metadata.clone()),
                        );
                    } else {
                        trace!(job_id = %id, "Completion for unknown job dropped");
                    }
                }
                WorkerResponse::Error { id, error } => {
                    self.fail(id, error);
                }
                WorkerResponse::Ready { .. } => {
                    trace!("Ready outside the handshake ignored");
                }
            },
            ChannelEvent::TransportError { generation, reason } => {
                self.fail_generation(*generation, reason);
            }
        }
    }
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTable")
            .field("pending", &self.len())
            .finish()
    }
}

/// Future of one submitted job.
///
/// Resolves with the job's result, or with the error that ended it. Dropping
/// the handle does not cancel the job; use
/// [`JobOrchestrator::abort`](crate::JobOrchestrator::abort) with [`JobHandle::id`].
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    kind: JobKind,
    receiver: oneshot::Receiver<OrchestratorResult<ProcessingResult>>,
}

impl JobHandle {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

impl Future for JobHandle {
    type Output = OrchestratorResult<ProcessingResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(OrchestratorError::transport(
                    "job dropped without a result",
                ))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vproc_models::MediaMetadata;

    fn result() -> ProcessingResult {
        ProcessingResult::local(vec![1, 2, 3], MediaMetadata::new(4, 4, 3))
    }

    #[tokio::test]
    async fn test_at_most_one_terminal_transition() {
        let table = PendingTable::new();
        let id = JobId::new();
        let handle = table.insert(id.clone(), JobKind::Optimize, 1, None);

        assert!(table.complete(&id, result()));
        assert!(!table.fail(&id, "late error"));
        assert!(!table.complete(&id, result()));
        assert!(!table.cancel(&id));

        assert_eq!(handle.await.unwrap(), result());
        assert!(table.is_empty());
    }

    #[test]
    fn test_handle_stays_pending_until_settled() {
        let table = PendingTable::new();
        let id = JobId::new();
        let mut handle =
            tokio_test::task::spawn(table.insert(id.clone(), JobKind::Transcode, 1, None));

        tokio_test::assert_pending!(handle.poll());
        table.progress(&id, 50, "transcoding");
        tokio_test::assert_pending!(handle.poll());

        table.complete(&id, result());
        assert!(handle.is_woken());
        let outcome = tokio_test::assert_ready!(handle.poll());
        assert_eq!(outcome.unwrap(), result());
    }

    #[tokio::test]
    async fn test_progress_invokes_callback_and_updates_snapshot() {
        let table = PendingTable::new();
        let id = JobId::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _handle = table.insert(
            id.clone(),
            JobKind::Transcode,
            1,
            Some(Arc::new(move |percent, stage| {
                assert_eq!(stage, "transcoding");
                counter.fetch_add(percent as usize, Ordering::SeqCst);
            })),
        );

        assert!(table.progress(&id, 45, "transcoding"));
        // Out of order is tolerated
        assert!(table.progress(&id, 10, "transcoding"));
        assert_eq!(calls.load(Ordering::SeqCst), 55);

        let snapshot = &table.snapshots()[0];
        assert_eq!(snapshot.state, JobState::Running);
        assert_eq!(snapshot.progress_percent, 10);
        assert_eq!(snapshot.stage.as_deref(), Some("transcoding"));

        assert!(!table.progress(&JobId::new(), 50, "x"));
    }

    #[tokio::test]
    async fn test_callback_may_reenter_table() {
        let table = PendingTable::new();
        let id = JobId::new();
        let inner = table.clone();
        let cancel_id = id.clone();
        let handle = table.insert(
            id.clone(),
            JobKind::Thumbnail,
            1,
            Some(Arc::new(move |_, _| {
                inner.cancel(&cancel_id);
            })),
        );

        table.progress(&id, 5, "extracting");
        assert_eq!(handle.await, Err(OrchestratorError::Cancelled));
    }

    #[tokio::test]
    async fn test_transport_event_rejects_everything() {
        let table = PendingTable::new();
        let a = table.insert(JobId::new(), JobKind::Transcode, 1, None);
        let b = table.insert(JobId::new(), JobKind::Optimize, 1, None);

        table.handle_event(&ChannelEvent::TransportError {
            generation: 1,
            reason: "gone".into(),
        });

        assert_eq!(a.await, Err(OrchestratorError::transport("gone")));
        assert_eq!(b.await, Err(OrchestratorError::transport("gone")));
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_stale_transport_event_spares_newer_jobs() {
        let table = PendingTable::new();
        let old = table.insert(JobId::new(), JobKind::Transcode, 1, None);
        let fresh_id = JobId::new();
        let fresh = table.insert(fresh_id.clone(), JobKind::Optimize, 2, None);

        // Failure of the first context arrives after the second was started
        table.handle_event(&ChannelEvent::TransportError {
            generation: 1,
            reason: "worker crashed".into(),
        });

        assert_eq!(old.await, Err(OrchestratorError::transport("worker crashed")));
        assert_eq!(table.ids(), vec![fresh_id.clone()]);

        table.handle_event(&ChannelEvent::Message(WorkerResponse::Complete {
            id: fresh_id,
            result: vec![1, 2, 3],
            metadata: MediaMetadata::new(4, 4, 3),
        }));
        assert_eq!(fresh.await.unwrap(), result());
    }

    #[tokio::test]
    async fn test_completion_for_unknown_job_is_dropped() {
        let table = PendingTable::new();
        let id = JobId::new();
        let handle = table.insert(id.clone(), JobKind::Optimize, 1, None);

        table.handle_event(&ChannelEvent::Message(WorkerResponse::Complete {
            id: JobId::new(),
            result: vec![9],
            metadata: MediaMetadata::new(1, 1, 1),
        }));
        assert!(table.contains(&id));

        table.cancel(&id);
        assert_eq!(handle.await, Err(OrchestratorError::Cancelled));
    }

    #[tokio::test]
    async fn test_error_message_routes_to_job() {
        let table = PendingTable::new();
        let id = JobId::new();
        let handle = table.insert(id.clone(), JobKind::Optimize, 1, None);

        table.handle_event(&ChannelEvent::Message(WorkerResponse::error(
            id,
            "Unsupported format",
        )));
        assert_eq!(
            handle.await,
            Err(OrchestratorError::job("Unsupported format"))
        );
    }

    #[tokio::test]
    async fn test_dropped_table_resolves_handle() {
        let table = PendingTable::new();
        let handle = table.insert(JobId::new(), JobKind::Optimize, 1, None);
        drop(table);
        assert!(matches!(handle.await, Err(OrchestratorError::Transport(_))));
    }
}
