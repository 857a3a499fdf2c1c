//! Messages exchanged across the execution boundary.
//!
//! Both enums are internally tagged on `"type"`, so the JSON shape is:
//!
//! ```text
//! {"type":"transcode","id":"<uuid>","payload":{"source":{..},"options":{..}}}
//! {"type":"progress","id":"<uuid>","progress":45,"stage":"transcoding"}
//! {"type":"complete","id":"<uuid>","result":"<base64>","metadata":{..}}
//! {"type":"error","id":"<uuid>","error":"message"}
//! ```
//!
//! `"init"` is the reserved id for the one-time initialization handshake.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobKind};
use crate::options::{JobPayload, OptimizeOptions, ThumbnailOptions, TranscodeOptions};
use crate::result::{MediaMetadata, ProcessingResult};

/// Reserved id of the initialization handshake.
pub const INIT_ID: &str = "init";

/// Caller -> execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Bring up the engine; answered by `ready` or `error` with id `"init"`
    Init { id: JobId },
    Transcode {
        id: JobId,
        payload: JobPayload<TranscodeOptions>,
    },
    Thumbnail {
        id: JobId,
        payload: JobPayload<ThumbnailOptions>,
    },
    Optimize {
        id: JobId,
        payload: JobPayload<OptimizeOptions>,
    },
    /// Stop a job; never acknowledged
    Abort { id: JobId },
}

impl WorkerRequest {
    /// The handshake request.
    pub fn init() -> Self {
        WorkerRequest::Init { id: JobId::init() }
    }

    pub fn abort(id: JobId) -> Self {
        WorkerRequest::Abort { id }
    }

    pub fn id(&self) -> &JobId {
        match self {
            WorkerRequest::Init { id }
            | WorkerRequest::Transcode { id, .. }
            | WorkerRequest::Thumbnail { id, .. }
            | WorkerRequest::Optimize { id, .. }
            | WorkerRequest::Abort { id } => id,
        }
    }

    /// Job kind for job requests, `None` for lifecycle messages.
    pub fn kind(&self) -> Option<JobKind> {
        match self {
            WorkerRequest::Transcode { .. } => Some(JobKind::Transcode),
            WorkerRequest::Thumbnail { .. } => Some(JobKind::Thumbnail),
            WorkerRequest::Optimize { .. } => Some(JobKind::Optimize),
            WorkerRequest::Init { .. } | WorkerRequest::Abort { .. } => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            WorkerRequest::Init { .. } => "init",
            WorkerRequest::Transcode { .. } => "transcode",
            WorkerRequest::Thumbnail { .. } => "thumbnail",
            WorkerRequest::Optimize { .. } => "optimize",
            WorkerRequest::Abort { .. } => "abort",
        }
    }
}

/// Execution context -> caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    /// Handshake complete
    Ready { id: JobId },
    /// Fractional progress (0-100); not guaranteed monotonic
    Progress {
        id: JobId,
        progress: u8,
        stage: String,
    },
    /// Terminal success
    Complete {
        id: JobId,
        #[serde(with = "crate::blob")]
        #[schemars(with = "String")]
        result: Vec<u8>,
        metadata: MediaMetadata,
    },
    /// Terminal failure
    Error { id: JobId, error: String },
}

impl WorkerResponse {
    pub fn ready() -> Self {
        WorkerResponse::Ready { id: JobId::init() }
    }

    pub fn progress(id: JobId, progress: u8, stage: impl Into<String>) -> Self {
        WorkerResponse::Progress {
            id,
            progress: progress.min(100),
            stage: stage.into(),
        }
    }

    pub fn complete(id: JobId, result: Vec<u8>, metadata: MediaMetadata) -> Self {
        WorkerResponse::Complete {
            id,
            result,
            metadata,
        }
    }

    pub fn error(id: JobId, error: impl Into<String>) -> Self {
        WorkerResponse::Error {
            id,
            error: error.into(),
        }
    }

    pub fn id(&self) -> &JobId {
        match self {
            WorkerResponse::Ready { id }
            | WorkerResponse::Progress { id, .. }
            | WorkerResponse::Complete { id, .. }
            | WorkerResponse::Error { id, .. } => id,
        }
    }

    /// `complete` and `error` end a job; nothing follows them for that id.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerResponse::Complete { .. } | WorkerResponse::Error { .. }
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            WorkerResponse::Ready { .. } => "ready",
            WorkerResponse::Progress { .. } => "progress",
            WorkerResponse::Complete { .. } => "complete",
            WorkerResponse::Error { .. } => "error",
        }
    }

    /// Convert a `complete` message into the caller-facing result.
    pub fn into_result(self) -> Option<ProcessingResult> {
        match self {
            WorkerResponse::Complete {
                result, metadata, ..
            } => Some(ProcessingResult::local(result, metadata)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SourceMedia;
    use serde_json::{json, Value};

    #[test]
    fn test_init_handshake_shape() {
        let v = serde_json::to_value(WorkerRequest::init()).unwrap();
        assert_eq!(v, json!({"type": "init", "id": "init"}));

        let ready: WorkerResponse =
            serde_json::from_value(json!({"type": "ready", "id": "init"})).unwrap();
        assert_eq!(ready, WorkerResponse::ready());
    }

    #[test]
    fn test_job_request_shape() {
        let req = WorkerRequest::Transcode {
            id: JobId::from_string("j1"),
            payload: JobPayload {
                source: SourceMedia::new("in.mov", vec![1, 2, 3]),
                options: TranscodeOptions::default(),
            },
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["type"], "transcode");
        assert_eq!(v["id"], "j1");
        assert_eq!(v["payload"]["source"]["bytes"], "AQID");
        assert_eq!(v["payload"]["options"]["resolution"], "720p");

        let back: WorkerRequest = serde_json::from_value(v).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_abort_shape() {
        let v = serde_json::to_value(WorkerRequest::abort(JobId::from_string("j9"))).unwrap();
        assert_eq!(v, json!({"type": "abort", "id": "j9"}));
    }

    #[test]
    fn test_response_fields_per_type() {
        let progress = serde_json::to_value(WorkerResponse::progress(
            JobId::from_string("j1"),
            45,
            "transcoding",
        ))
        .unwrap();
        assert_eq!(
            progress,
            json!({"type": "progress", "id": "j1", "progress": 45, "stage": "transcoding"})
        );

        let complete = serde_json::to_value(WorkerResponse::complete(
            JobId::from_string("j1"),
            b"hi".to_vec(),
            MediaMetadata::new(10, 20, 2),
        ))
        .unwrap();
        assert_eq!(complete["result"], "aGk=");
        assert_eq!(complete["metadata"]["width"], 10);
        assert_eq!(complete["metadata"]["sizeBytes"], 2);
        assert!(complete.get("error").is_none());

        let error: Value =
            serde_json::to_value(WorkerResponse::error(JobId::from_string("j1"), "boom")).unwrap();
        assert_eq!(error, json!({"type": "error", "id": "j1", "error": "boom"}));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let parsed: Result<WorkerResponse, _> =
            serde_json::from_value(json!({"type": "bogus", "id": "x"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_progress_is_clamped() {
        match WorkerResponse::progress(JobId::new(), 250, "x") {
            WorkerResponse::Progress { progress, .. } => assert_eq!(progress, 100),
            other => panic!("Expected Progress, got {other:?}"),
        }
    }
}
