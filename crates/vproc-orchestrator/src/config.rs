//! Orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

use vproc_models::CapabilityPolicy;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long the init handshake may take before the channel gives up
    pub init_timeout: Duration,
    /// Working storage for the FFmpeg engine
    pub work_dir: PathBuf,
    /// Jobs the execution context runs at once; the rest wait their turn
    pub max_concurrent_jobs: usize,
    /// FFmpeg executable (name on PATH or absolute path)
    pub ffmpeg_binary: String,
    /// FFprobe executable
    pub ffprobe_binary: String,
    /// Thresholds for the local/fallback decision
    pub policy: CapabilityPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(30),
            work_dir: std::env::temp_dir().join("vproc"),
            max_concurrent_jobs: 2,
            ffmpeg_binary: "ffmpeg".to_string(),
            ffprobe_binary: "ffprobe".to_string(),
            policy: CapabilityPolicy::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl OrchestratorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let default_policy = defaults.policy;

        Self {
            init_timeout: Duration::from_secs(
                env_parse("VPROC_INIT_TIMEOUT_SECS").unwrap_or(defaults.init_timeout.as_secs()),
            ),
            work_dir: std::env::var("VPROC_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_concurrent_jobs: env_parse("VPROC_MAX_CONCURRENT_JOBS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            ffmpeg_binary: std::env::var("VPROC_FFMPEG_BIN").unwrap_or(defaults.ffmpeg_binary),
            ffprobe_binary: std::env::var("VPROC_FFPROBE_BIN").unwrap_or(defaults.ffprobe_binary),
            policy: CapabilityPolicy {
                low_end_memory_mb: env_parse("VPROC_LOW_END_MEMORY_MB")
                    .unwrap_or(default_policy.low_end_memory_mb),
                low_end_min_cores: env_parse("VPROC_LOW_END_MIN_CORES")
                    .unwrap_or(default_policy.low_end_min_cores),
                mobile_fallback_memory_mb: env_parse("VPROC_MOBILE_FALLBACK_MEMORY_MB")
                    .unwrap_or(default_policy.mobile_fallback_memory_mb),
            },
        }
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }
}
