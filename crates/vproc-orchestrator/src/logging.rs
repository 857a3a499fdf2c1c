//! Per-job lifecycle logging.
//!
//! A [`JobLogger`] owns a `job` span carrying the id and kind; every line is
//! emitted inside it so one job can be followed from submission to its
//! terminal outcome.

use tracing::{debug, error, info, info_span, warn, Span};
use vproc_models::{JobId, JobKind};

#[derive(Debug, Clone)]
pub struct JobLogger {
    span: Span,
}

impl JobLogger {
    pub fn new(job_id: &JobId, kind: JobKind) -> Self {
        Self {
            span: info_span!("job", job_id = %job_id, kind = %kind),
        }
    }

    pub fn log_submitted(&self, source_bytes: usize) {
        self.span
            .in_scope(|| info!(source_bytes, "Job submitted"));
    }

    /// Progress is chatty; it stays at debug.
    pub fn log_progress(&self, percent: u8, stage: &str) {
        self.span
            .in_scope(|| debug!(percent, stage, "Job progress"));
    }

    pub fn log_completion(&self, size_bytes: u64, elapsed_ms: i64) {
        self.span
            .in_scope(|| info!(size_bytes, elapsed_ms, "Job completed"));
    }

    pub fn log_error(&self, message: &str) {
        self.span
            .in_scope(|| error!(error = message, "Job failed"));
    }

    pub fn log_aborted(&self) {
        self.span.in_scope(|| info!("Job aborted by caller"));
    }

    pub fn log_transport_failure(&self, reason: &str) {
        self.span
            .in_scope(|| warn!(reason, "Job lost to transport failure"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_without_subscriber() {
        let logger = JobLogger::new(&JobId::new(), JobKind::Thumbnail);
        logger.log_submitted(10);
        logger.log_progress(50, "extracting");
        logger.log_completion(3, 12);
        logger.log_error("boom");
        logger.log_aborted();
        logger.log_transport_failure("gone");
    }
}
