#![deny(unreachable_patterns)]
//! Media side of the vproc job orchestrator.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation support via tokio
//! - The `ProcessingEngine` trait and its FFmpeg CLI implementation
//! - The engine adapter that runs inside an execution context
//! - Host capability detection

pub mod adapter;
pub mod capability;
pub mod command;
pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod operations;
pub mod probe;
pub mod progress;

pub use adapter::{EngineWorker, JobFiles};
pub use capability::{CapabilityDetector, CapabilityProbe, HostFacts, HostProbe, StaticProbe};
pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use engine::ProcessingEngine;
pub use error::{MediaError, MediaResult};
pub use ffmpeg::FfmpegEngine;
pub use operations::Operation;
pub use probe::{probe_media, VideoInfo};
pub use progress::{EngineProgress, EngineProgressFn, FfmpegProgress, ProgressParser};
