//! Job identity and lifecycle.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::protocol::INIT_ID;

/// Unique identifier for a job.
///
/// Opaque to everything but equality. Generated ids are UUID v4 strings and
/// never collide with the reserved handshake id `"init"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The reserved id used by the initialization handshake.
    pub fn init() -> Self {
        Self(INIT_ID.to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the reserved handshake id.
    pub fn is_init(&self) -> bool {
        self.0 == INIT_ID
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of media work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Re-encode a video to a target resolution/format/quality
    Transcode,
    /// Extract a single still frame from a video
    Thumbnail,
    /// Resize and re-compress an image
    Optimize,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Transcode => "transcode",
            JobKind::Thumbnail => "thumbnail",
            JobKind::Optimize => "optimize",
        }
    }

    /// Stage label reported while the engine runs this kind of job.
    pub fn stage(&self) -> &'static str {
        match self {
            JobKind::Transcode => "transcoding",
            JobKind::Thumbnail => "extracting",
            JobKind::Optimize => "optimizing",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle state.
///
/// `Pending -> Running -> {Completed | Failed | Aborted}`. Terminal states are
/// final; a job is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Submitted, no progress seen yet
    #[default]
    Pending,
    /// At least one progress tick received
    Running,
    /// Result delivered
    Completed,
    /// Engine or transport error
    Failed,
    /// Cancelled by the caller
    Aborted,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Aborted
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a job the orchestrator is still tracking.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    /// Last progress percentage seen (0-100). Not guaranteed monotonic.
    pub progress_percent: u8,
    /// Last stage label seen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique_and_not_init() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert!(!a.is_init());
        assert!(JobId::init().is_init());
    }

    #[test]
    fn test_job_id_serializes_transparently() {
        let id = JobId::from_string("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Aborted.is_terminal());
    }
}
