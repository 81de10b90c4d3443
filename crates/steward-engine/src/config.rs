//! Engine tuning knobs with serde-friendly defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;

/// Runtime configuration for the reconciliation engine.
///
/// Every field has a default, so a config file only needs to name the
/// values it wants to override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of dispatcher workers pulling from the shared queue.
    pub worker_count: usize,
    /// Upper bound on a single manager call before it is treated as a
    /// transient failure.
    pub operation_timeout_ms: u64,
    /// Requeue delay while a manifest waits on unsatisfied dependencies.
    pub pending_requeue_ms: u64,
    pub backoff: BackoffPolicy,
    /// Interval for re-verifying settled resources against the external
    /// system. `None` disables periodic resync.
    pub resync_interval_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            operation_timeout_ms: 30_000,
            pending_requeue_ms: 5_000,
            backoff: BackoffPolicy::default(),
            resync_interval_ms: Some(300_000),
        }
    }
}

impl EngineConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn pending_requeue(&self) -> Duration {
        Duration::from_millis(self.pending_requeue_ms)
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        self.resync_interval_ms.map(Duration::from_millis)
    }
}
