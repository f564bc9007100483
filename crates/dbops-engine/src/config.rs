//! Engine configuration

use dbops_store::BackoffConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the operations engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum admission queue length per cluster
    #[serde(default = "default_queue_limit")]
    pub queue_limit: usize,

    /// Delay before re-checking the cluster phase during admission
    #[serde(default = "default_wait_phase_requeue_ms")]
    pub wait_phase_requeue_ms: u64,

    /// Retries for compare-and-swap writes to shared objects
    #[serde(default)]
    pub conflict_retry: BackoffConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_limit: default_queue_limit(),
            wait_phase_requeue_ms: default_wait_phase_requeue_ms(),
            conflict_retry: BackoffConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn wait_phase_requeue(&self) -> Duration {
        Duration::from_millis(self.wait_phase_requeue_ms)
    }
}

fn default_queue_limit() -> usize {
    20
}

fn default_wait_phase_requeue_ms() -> u64 {
    1000
}
