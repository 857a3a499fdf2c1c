//! Asynchronous media job orchestrator.
//!
//! This crate provides:
//! - An execution channel to an isolated execution context, with a one-time
//!   init handshake and transport-failure detection
//! - A job orchestrator correlating progress, completion and errors back to
//!   each submission, with cooperative cancellation
//! - Capability-based fail-fast so callers can fall back to server processing
//! - A session facade with observable state, and a factory for shared instances
//! - Structured job logging and metrics

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod pending;
pub mod session;

pub use channel::{ChannelEvent, ChannelState, EventHandler, ExecutionChannel, Subscription};
pub use config::OrchestratorConfig;
pub use context::{ContextEvent, ContextHandle, ContextSpawner, LocalContextSpawner};
pub use error::{ChannelError, OrchestratorError, OrchestratorResult};
pub use factory::OrchestratorFactory;
pub use logging::JobLogger;
pub use orchestrator::JobOrchestrator;
pub use pending::{JobHandle, PendingTable, ProgressFn};
pub use session::{ProcessingSession, SessionPhase, SessionState};
