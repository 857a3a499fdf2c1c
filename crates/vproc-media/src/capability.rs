//! Host capability detection.
//!
//! Decides whether this host can run media jobs locally or should hand them
//! to a server-side fallback.
//!
//! # Usage
//! ```rust,no_run
//! use vproc_media::capability::{CapabilityDetector, HostProbe};
//!
//! let detector = CapabilityDetector::new(HostProbe::new("/tmp/vproc", "ffmpeg"));
//! detector.log_capabilities();
//! if !detector.can_run_locally() {
//!     // route the job to the server
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sysinfo::System;
use tracing::{debug, info, warn};

use vproc_models::{CapabilityPolicy, CapabilitySnapshot};

/// Raw facts about the host, before any policy is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostFacts {
    /// Scratch storage for passing media to the engine is usable
    pub shared_memory: bool,
    /// An isolated execution context can be started
    pub execution_context: bool,
    /// Total physical memory in MiB (0 when unknown)
    pub memory_mb: u64,
    /// Logical cores (0 when unknown)
    pub cores: u32,
    pub mobile: bool,
}

/// Source of [`HostFacts`].
pub trait CapabilityProbe: Send + Sync {
    /// Gather facts. Must not panic; unknown values degrade to the
    /// conservative answer.
    fn probe(&self) -> HostFacts;
}

/// Probes the running host.
#[derive(Debug, Clone)]
pub struct HostProbe {
    work_dir: PathBuf,
    engine_binary: String,
}

impl HostProbe {
    pub fn new(work_dir: impl Into<PathBuf>, engine_binary: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            engine_binary: engine_binary.into(),
        }
    }

    fn scratch_writable(&self) -> bool {
        // Nearest existing ancestor decides whether the dir can be created
        let mut dir: Option<&Path> = Some(&self.work_dir);
        while let Some(candidate) = dir {
            if let Ok(meta) = std::fs::metadata(candidate) {
                return meta.is_dir() && can_create_in(candidate);
            }
            dir = candidate.parent();
        }
        false
    }

    fn execution_context_available(&self) -> bool {
        tokio::runtime::Handle::try_current().is_ok()
            && which::which(&self.engine_binary).is_ok()
    }

    fn memory_mb() -> u64 {
        let mut sys = System::new();
        sys.refresh_memory();
        // sysinfo reports bytes
        sys.total_memory() / 1024 / 1024
    }

    fn cores() -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(0)
    }
}

/// Create and remove a marker file. Permission bits alone miss ownership,
/// ACLs and read-only mounts.
fn can_create_in(dir: &Path) -> bool {
    static NEXT_MARKER: AtomicU64 = AtomicU64::new(0);
    let marker = dir.join(format!(
        ".vproc-write-check-{}-{}",
        std::process::id(),
        NEXT_MARKER.fetch_add(1, Ordering::Relaxed)
    ));
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&marker)
    {
        Ok(_) => {
            if let Err(e) = std::fs::remove_file(&marker) {
                debug!(path = %marker.display(), error = %e, "Failed to remove write marker");
            }
            true
        }
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Scratch directory not writable");
            false
        }
    }
}

impl CapabilityProbe for HostProbe {
    fn probe(&self) -> HostFacts {
        HostFacts {
            shared_memory: self.scratch_writable(),
            execution_context: self.execution_context_available(),
            memory_mb: Self::memory_mb(),
            cores: Self::cores(),
            mobile: cfg!(any(target_os = "android", target_os = "ios")),
        }
    }
}

/// Fixed facts, for overrides and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub HostFacts);

impl CapabilityProbe for StaticProbe {
    fn probe(&self) -> HostFacts {
        self.0
    }
}

/// Applies a [`CapabilityPolicy`] to probed host facts.
#[derive(Clone)]
pub struct CapabilityDetector {
    probe: Arc<dyn CapabilityProbe>,
    policy: CapabilityPolicy,
}

impl std::fmt::Debug for CapabilityDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityDetector")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CapabilityDetector {
    pub fn new(probe: impl CapabilityProbe + 'static) -> Self {
        Self {
            probe: Arc::new(probe),
            policy: CapabilityPolicy::default(),
        }
    }

    /// Detector over a probe that is shared with other detectors.
    pub fn from_shared(probe: Arc<dyn CapabilityProbe>) -> Self {
        Self {
            probe,
            policy: CapabilityPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CapabilityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &CapabilityPolicy {
        &self.policy
    }

    /// Take a fresh snapshot of the host.
    pub fn detect(&self) -> CapabilitySnapshot {
        let facts = self.probe.probe();
        let snapshot = CapabilitySnapshot {
            supports_shared_memory: facts.shared_memory,
            supports_execution_context: facts.execution_context,
            estimated_memory_mb: facts.memory_mb,
            logical_cores: facts.cores,
            is_mobile: facts.mobile,
            is_low_end_device: self.policy.is_low_end(facts.memory_mb, facts.cores),
        };
        debug!(?snapshot, "Detected capabilities");
        snapshot
    }

    pub fn can_run_locally(&self) -> bool {
        self.policy.can_run_locally(&self.detect())
    }

    pub fn should_prefer_server_fallback(&self, snapshot: &CapabilitySnapshot) -> bool {
        self.policy.should_prefer_server_fallback(snapshot)
    }

    /// Log the current snapshot and the decision it leads to.
    pub fn log_capabilities(&self) {
        let snapshot = self.detect();
        info!(
            shared_memory = snapshot.supports_shared_memory,
            execution_context = snapshot.supports_execution_context,
            memory_mb = snapshot.estimated_memory_mb,
            cores = snapshot.logical_cores,
            mobile = snapshot.is_mobile,
            low_end = snapshot.is_low_end_device,
            "Capability detection complete"
        );

        if self.policy.can_run_locally(&snapshot) {
            if self.should_prefer_server_fallback(&snapshot) {
                info!("Local processing available but server fallback preferred");
            } else {
                info!("Local processing available");
            }
        } else {
            warn!("Local processing unavailable: use server fallback");
        }
    }
}
