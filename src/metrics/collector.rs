//! Metrics collector using prometheus-client.
//!
//! Request counts and latency, per-attempt outcomes, failovers and backend
//! health.

use crate::config::Role;
use crate::proxy::Classification;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Labels for request metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub backend: String,
    pub method: String,
    pub status: String,
}

/// Labels for per-backend latency.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DurationLabels {
    pub backend: String,
}

/// Labels for upstream attempts.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AttemptLabels {
    pub backend: String,
    pub outcome: String,
}

/// Labels for failovers.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FailoverLabels {
    pub from: String,
    pub to: String,
}

/// Labels for backend health metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub backend: String,
    pub role: String,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Requests answered, by serving backend and final status.
    requests_total: Family<RequestLabels, Counter>,
    /// Request duration histogram (in seconds), retries included.
    request_duration_seconds: Family<DurationLabels, Histogram>,
    /// Upstream attempts by classification.
    attempts_total: Family<AttemptLabels, Counter>,
    /// Requests that were served by a later candidate than the first one tried.
    failovers_total: Family<FailoverLabels, Counter>,
    /// Backend eligibility (1 = UP, 0 = DOWN).
    backend_up: Family<BackendLabels, Gauge>,
    /// Requests currently being forwarded.
    active_requests: Gauge,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        let request_duration_seconds = Family::<DurationLabels, Histogram>::new_with_constructor(
            || {
                // Buckets: 1ms .. ~15s
                Histogram::new(exponential_buckets(0.001, 2.5, 12))
            },
        );
        let attempts_total = Family::<AttemptLabels, Counter>::default();
        let failovers_total = Family::<FailoverLabels, Counter>::default();
        let backend_up = Family::<BackendLabels, Gauge>::default();
        let active_requests = Gauge::default();

        registry.register(
            "bgproxy_requests",
            "Total number of requests answered",
            requests_total.clone(),
        );
        registry.register(
            "bgproxy_request_duration_seconds",
            "Request duration in seconds, including retries",
            request_duration_seconds.clone(),
        );
        registry.register(
            "bgproxy_attempts",
            "Upstream attempts by outcome",
            attempts_total.clone(),
        );
        registry.register(
            "bgproxy_failovers",
            "Requests served by a backend other than the first candidate",
            failovers_total.clone(),
        );
        registry.register(
            "bgproxy_backend_up",
            "Backend routing eligibility (1=up, 0=down)",
            backend_up.clone(),
        );
        registry.register(
            "bgproxy_active_requests",
            "Requests currently in flight",
            active_requests.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                requests_total,
                request_duration_seconds,
                attempts_total,
                failovers_total,
                backend_up,
                active_requests,
                registry,
            }),
        }
    }

    /// Get the registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Record a request answered to the client.
    pub fn record_request(&self, backend: &str, method: &str, status: u16, duration: Duration) {
        let labels = RequestLabels {
            backend: backend.to_string(),
            method: method.to_string(),
            status: status.to_string(),
        };
        self.inner.requests_total.get_or_create(&labels).inc();

        let duration_labels = DurationLabels {
            backend: backend.to_string(),
        };
        self.inner
            .request_duration_seconds
            .get_or_create(&duration_labels)
            .observe(duration.as_secs_f64());
    }

    /// Record one upstream attempt.
    pub fn record_attempt(&self, backend: &str, classification: Classification) {
        let labels = AttemptLabels {
            backend: backend.to_string(),
            outcome: classification.as_str().to_string(),
        };
        self.inner.attempts_total.get_or_create(&labels).inc();
    }

    /// Record a request that moved from one backend to another.
    pub fn record_failover(&self, from: &str, to: &str) {
        let labels = FailoverLabels {
            from: from.to_string(),
            to: to.to_string(),
        };
        self.inner.failovers_total.get_or_create(&labels).inc();
    }

    /// Update backend eligibility.
    pub fn set_backend_up(&self, backend: &str, role: Role, up: bool) {
        let labels = BackendLabels {
            backend: backend.to_string(),
            role: role.as_str().to_string(),
        };
        self.inner
            .backend_up
            .get_or_create(&labels)
            .set(if up { 1 } else { 0 });
    }

    /// Track a request in flight until the guard is dropped.
    pub fn track_active(&self) -> ActiveRequestGuard {
        self.inner.active_requests.inc();
        ActiveRequestGuard {
            gauge: self.inner.active_requests.clone(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight gauge on drop, including on client disconnect.
pub struct ActiveRequestGuard {
    gauge: Gauge,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}
