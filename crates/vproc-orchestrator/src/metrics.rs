//! Orchestrator metrics.
//!
//! Only the `metrics` facade is used here; installing an exporter is left to
//! the embedding application.

use metrics::{counter, gauge};
use vproc_models::JobKind;

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "vproc_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vproc_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vproc_jobs_failed_total";
    pub const JOBS_ABORTED_TOTAL: &str = "vproc_jobs_aborted_total";
    pub const JOBS_PENDING: &str = "vproc_jobs_pending";

    pub const TRANSPORT_FAILURES_TOTAL: &str = "vproc_transport_failures_total";
    pub const CHANNEL_INIT_TOTAL: &str = "vproc_channel_init_total";
}

pub fn record_job_submitted(kind: JobKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed(kind: JobKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
}

pub fn record_job_failed(kind: JobKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_jobs_aborted(count: usize) {
    counter!(names::JOBS_ABORTED_TOTAL).increment(count as u64);
}

pub fn set_jobs_pending(count: usize) {
    gauge!(names::JOBS_PENDING).set(count as f64);
}

pub fn record_transport_failure() {
    counter!(names::TRANSPORT_FAILURES_TOTAL).increment(1);
}

/// `outcome` is `ready`, `failed` or `timeout`.
pub fn record_channel_init(outcome: &'static str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::CHANNEL_INIT_TOTAL, &labels).increment(1);
}
