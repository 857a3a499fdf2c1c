//! Orchestrator construction.
//!
//! The factory replaces a process-wide singleton: it builds independent
//! orchestrators on demand and also keeps one lazily built instance that
//! sessions can share.

use std::sync::{Arc, OnceLock};

use vproc_media::{CapabilityDetector, CapabilityProbe, HostProbe};

use crate::config::OrchestratorConfig;
use crate::context::{ContextSpawner, LocalContextSpawner};
use crate::orchestrator::JobOrchestrator;
use crate::session::ProcessingSession;

pub struct OrchestratorFactory {
    config: OrchestratorConfig,
    spawner: Arc<dyn ContextSpawner>,
    probe: Arc<dyn CapabilityProbe>,
    shared: OnceLock<Arc<JobOrchestrator>>,
}

impl OrchestratorFactory {
    /// Factory for this host: FFmpeg on a local task, capabilities probed.
    pub fn new(config: OrchestratorConfig) -> Self {
        let spawner = Arc::new(LocalContextSpawner::new(&config));
        let probe = Arc::new(HostProbe::new(
            config.work_dir.clone(),
            config.ffmpeg_binary.clone(),
        ));
        Self::with_parts(config, spawner, probe)
    }

    pub fn with_parts(
        config: OrchestratorConfig,
        spawner: Arc<dyn ContextSpawner>,
        probe: Arc<dyn CapabilityProbe>,
    ) -> Self {
        Self {
            config,
            spawner,
            probe,
            shared: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// A new, independent orchestrator.
    pub fn create(&self) -> Arc<JobOrchestrator> {
        let detector = CapabilityDetector::from_shared(Arc::clone(&self.probe))
            .with_policy(self.config.policy);
        Arc::new(JobOrchestrator::new(
            self.config.clone(),
            detector,
            Arc::clone(&self.spawner),
        ))
    }

    /// The instance owned by this factory, built on first use.
    pub fn shared(&self) -> Arc<JobOrchestrator> {
        Arc::clone(self.shared.get_or_init(|| self.create()))
    }

    /// A session over the shared instance. Closing it leaves the instance
    /// running for the other sessions.
    pub fn session(&self) -> ProcessingSession {
        ProcessingSession::attached(self.shared())
    }

    /// A session with an orchestrator of its own, torn down on close.
    pub fn isolated_session(&self) -> ProcessingSession {
        ProcessingSession::new(self.create())
    }
}

impl std::fmt::Debug for OrchestratorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorFactory")
            .field("config", &self.config)
            .field("shared_built", &self.shared.get().is_some())
            .finish_non_exhaustive()
    }
}
