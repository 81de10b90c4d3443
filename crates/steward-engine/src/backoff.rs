//! Exponential backoff with a cap and jitter, tracked per identity.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use steward_core::identity::ResourceIdentity;

/// Backoff curve parameters. Delays are `base × factor^attempt`, capped,
/// with a fractional jitter applied on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub factor: f64,
    pub cap_ms: u64,
    /// Fractional randomization, e.g. 0.1 spreads each delay ±10%.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 500,
            factor: 2.0,
            cap_ms: 60_000,
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = (self.base_ms as f64) * self.factor.powi(attempt as i32);
        let capped = raw.min(self.cap_ms as f64);
        let spread = capped * self.jitter * (fastrand::f64() * 2.0 - 1.0);
        Duration::from_millis((capped + spread).max(0.0) as u64)
    }
}

/// Per-identity attempt counters over one shared policy.
///
/// Attempts reset whenever a pass commits a real state transition, so every
/// lifecycle phase starts its retries from the base delay.
pub struct BackoffTracker {
    policy: BackoffPolicy,
    attempts: Mutex<HashMap<ResourceIdentity, u32>>,
}

impl BackoffTracker {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Delay for this identity's next retry; bumps its attempt counter.
    pub fn next_delay(&self, id: &ResourceIdentity) -> Duration {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let attempt = attempts.entry(id.clone()).or_insert(0);
        let delay = self.policy.delay_for_attempt(*attempt);
        *attempt += 1;
        delay
    }

    pub fn reset(&self, id: &ResourceIdentity) {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.remove(id);
    }
}
