//! Capability snapshot and the fallback policy applied to it.
//!
//! The thresholds in [`CapabilityPolicy`] are empirical and kept as
//! configuration; nothing here tries to derive a "correct" value.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Memory below which a device counts as low-end.
pub const DEFAULT_LOW_END_MEMORY_MB: u64 = 2048;
/// Core count below which a device counts as low-end.
pub const DEFAULT_LOW_END_MIN_CORES: u32 = 4;
/// Mobile devices below this memory prefer the server path.
pub const DEFAULT_MOBILE_FALLBACK_MEMORY_MB: u64 = 3072;

/// Point-in-time assessment of the host. Recomputed, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySnapshot {
    /// Scratch storage the engine can share with the adapter
    pub supports_shared_memory: bool,
    /// An isolated execution context can be started
    pub supports_execution_context: bool,
    pub estimated_memory_mb: u64,
    pub logical_cores: u32,
    pub is_mobile: bool,
    /// Derived from memory and cores by the policy in effect at detection
    pub is_low_end_device: bool,
}

impl CapabilitySnapshot {
    /// The most conservative snapshot: nothing supported.
    pub fn unsupported() -> Self {
        Self {
            supports_shared_memory: false,
            supports_execution_context: false,
            estimated_memory_mb: 0,
            logical_cores: 0,
            is_mobile: false,
            is_low_end_device: true,
        }
    }
}

/// Thresholds turning raw host facts into local/fallback decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CapabilityPolicy {
    pub low_end_memory_mb: u64,
    pub low_end_min_cores: u32,
    pub mobile_fallback_memory_mb: u64,
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        Self {
            low_end_memory_mb: DEFAULT_LOW_END_MEMORY_MB,
            low_end_min_cores: DEFAULT_LOW_END_MIN_CORES,
            mobile_fallback_memory_mb: DEFAULT_MOBILE_FALLBACK_MEMORY_MB,
        }
    }
}

impl CapabilityPolicy {
    pub fn is_low_end(&self, memory_mb: u64, cores: u32) -> bool {
        memory_mb < self.low_end_memory_mb || cores < self.low_end_min_cores
    }

    /// Hard capability check.
    pub fn can_run_locally(&self, snapshot: &CapabilitySnapshot) -> bool {
        snapshot.supports_shared_memory
            && snapshot.supports_execution_context
            && !snapshot.is_low_end_device
    }

    /// Soft policy on top of the hard check: low-memory mobile devices are
    /// sent to the server even when local processing is technically possible.
    pub fn should_prefer_server_fallback(&self, snapshot: &CapabilitySnapshot) -> bool {
        !self.can_run_locally(snapshot)
            || (snapshot.is_mobile && snapshot.estimated_memory_mb < self.mobile_fallback_memory_mb)
    }
}
