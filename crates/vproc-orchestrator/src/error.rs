//! Orchestrator error types.

use std::time::Duration;

use thiserror::Error;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Failures of the execution channel itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Failed to start execution context: {0}")]
    SpawnFailed(String),

    #[error("Execution context did not become ready within {0:?}")]
    InitTimeout(Duration),

    #[error("Execution context failed to initialize: {0}")]
    InitFailed(String),

    #[error("Execution context exited")]
    ContextExited,

    #[error("Channel closed")]
    Closed,
}

impl ChannelError {
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    pub fn init_failed(msg: impl Into<String>) -> Self {
        Self::InitFailed(msg.into())
    }
}

/// What a caller sees when a job cannot be submitted or does not succeed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrchestratorError {
    /// Host cannot process locally; route the job to the server instead
    #[error("CLIENT_PROCESSING_UNAVAILABLE")]
    ClientProcessingUnavailable,

    #[error("Initialization failed: {0}")]
    Initialization(#[from] ChannelError),

    /// The execution context went away with this job in flight
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The engine reported an error for this job
    #[error("{0}")]
    Job(String),

    #[error("cancelled by caller")]
    Cancelled,
}

impl OrchestratorError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn job(msg: impl Into<String>) -> Self {
        Self::Job(msg.into())
    }

    /// The caller should take the server-side path.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ClientProcessingUnavailable | OrchestratorError::Initialization(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, OrchestratorError::Cancelled)
    }

    /// Resubmitting may succeed: the next submission starts a fresh context.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Transport(_) | OrchestratorError::Initialization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_display_is_stable() {
        assert_eq!(
            OrchestratorError::ClientProcessingUnavailable.to_string(),
            "CLIENT_PROCESSING_UNAVAILABLE"
        );
        assert_eq!(OrchestratorError::Cancelled.to_string(), "cancelled by caller");
    }

    #[test]
    fn test_job_error_passes_message_through() {
        assert_eq!(OrchestratorError::job("bad input").to_string(), "bad input");
    }

    #[test]
    fn test_classification() {
        let init: OrchestratorError = ChannelError::InitTimeout(Duration::from_secs(30)).into();
        assert!(init.is_unavailable());
        assert!(init.is_retryable());
        assert!(OrchestratorError::transport("gone").is_retryable());
        assert!(!OrchestratorError::job("x").is_retryable());
        assert!(OrchestratorError::Cancelled.is_cancelled());
        assert!(!OrchestratorError::Cancelled.is_unavailable());
    }
}
