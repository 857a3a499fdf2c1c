//! Shared data models for the vproc job orchestrator.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers, kinds and lifecycle states
//! - Kind-specific job options and their preset tables
//! - The wire protocol spoken across the execution boundary
//! - Processing results and media metadata
//! - Capability snapshots and the fallback policy derived from them

pub mod capability;
pub mod job;
pub mod options;
pub mod protocol;
pub mod result;

mod blob;

// Re-export common types
pub use capability::{CapabilityPolicy, CapabilitySnapshot};
pub use job::{JobId, JobKind, JobSnapshot, JobState};
pub use options::{
    EncodePreset, ImageFormat, JobPayload, JobRequest, OptimizeOptions, Quality, Resolution,
    SourceMedia, ThumbnailOptions, TranscodeOptions, VideoFormat,
};
pub use protocol::{WorkerRequest, WorkerResponse, INIT_ID};
pub use result::{MediaMetadata, ProcessingResult};
