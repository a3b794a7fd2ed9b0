//! Passive health tracking.
//!
//! Backends are judged only by the outcomes of proxied requests. A backend
//! goes DOWN after `failure_threshold` consecutive qualifying failures and
//! comes back UP lazily: the next routing decision after the cooldown sees
//! an expired deadline. No background timer and no active probing.

use crate::backend::Backend;
use crate::config::{FailoverConfig, Role};
use crate::health::{HealthCell, HealthTransition};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Thresholds that drive UP/DOWN transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Consecutive failures before marking DOWN (>= 1).
    pub failure_threshold: u32,
    /// Mandatory DOWN duration.
    pub cooldown: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            cooldown: Duration::from_secs(10),
        }
    }
}

impl From<&FailoverConfig> for HealthPolicy {
    fn from(config: &FailoverConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown,
        }
    }
}

/// Point-in-time view of one backend's health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendHealth {
    pub name: String,
    pub role: Role,
    pub up: bool,
    pub consecutive_failures: u32,
    pub remaining_cooldown: Option<Duration>,
}

/// Applies a [`HealthPolicy`] to the health cells owned by backends.
#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    policy: HealthPolicy,
}

impl HealthTracker {
    pub fn new(policy: HealthPolicy) -> Self {
        Self { policy }
    }

    /// Record a qualifying failure (connect error, timeout, retryable 5xx).
    pub fn record_failure(&self, backend: &Backend, now: Instant) -> HealthTransition {
        let transition = self.cell(backend).record_failure(
            self.policy.failure_threshold,
            self.policy.cooldown,
            now,
        );

        if transition == HealthTransition::MarkedDown {
            warn!(
                backend = %backend.name(),
                role = %backend.role(),
                cooldown_ms = self.policy.cooldown.as_millis() as u64,
                "backend marked down after {} consecutive failures",
                self.policy.failure_threshold
            );
        } else {
            debug!(
                backend = %backend.name(),
                failures = self.cell(backend).consecutive_failures(),
                "backend failure recorded"
            );
        }

        transition
    }

    /// Record a response that counts as success for routing purposes.
    pub fn record_success(&self, backend: &Backend) {
        self.cell(backend).record_success();
    }

    /// Whether `backend` is eligible at `now`. Pure query.
    pub fn is_up(&self, backend: &Backend, now: Instant) -> bool {
        self.cell(backend).is_up(now)
    }

    pub fn snapshot(&self, backend: &Backend, now: Instant) -> BackendHealth {
        let cell = self.cell(backend);
        BackendHealth {
            name: backend.name().to_string(),
            role: backend.role(),
            up: cell.is_up(now),
            consecutive_failures: cell.consecutive_failures(),
            remaining_cooldown: cell.remaining_cooldown(now),
        }
    }

    fn cell<'a>(&self, backend: &'a Backend) -> &'a HealthCell {
        backend.health()
    }
}
