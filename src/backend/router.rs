//! Primary-preferred failover router.
//!
//! Candidates are the UP backends in preference order. Each request walks
//! the candidates until one answers with something other than a qualifying
//! failure. There is no load balancing: the primary takes all traffic while
//! it is UP.

use crate::backend::{Backend, Pool};
use crate::config::{AllDownPolicy, Config, Role};
use crate::health::{BackendHealth, HealthPolicy, HealthTracker, HealthTransition};
use crate::metrics::MetricsCollector;
use crate::proxy::{
    ForwardRequest, HttpUpstream, RequestOutcome, RetryableStatuses, Upstream, UpstreamError,
};
use bytes::Bytes;
use hyper::Response;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Why a request produced no upstream response.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// Every candidate failed; this is the last one's transport error.
    #[error("backend '{backend}' failed: {source}")]
    Upstream {
        backend: String,
        #[source]
        source: UpstreamError,
        /// Status of every attempt in order.
        upstream_statuses: Vec<u16>,
    },

    /// All backends are DOWN and the pool is configured to fail fast.
    #[error("no healthy backend available")]
    NoHealthyBackend,
}

/// A response obtained from the pool.
#[derive(Debug)]
pub struct Forwarded {
    /// Upstream response, unmodified apart from hop-by-hop headers.
    pub response: Response<Bytes>,
    /// Backend that produced `response`.
    pub backend: String,
    pub role: Role,
    /// Number of backends tried.
    pub attempts: usize,
    /// Status of every attempt in order (502/504 for transport failures).
    pub upstream_statuses: Vec<u16>,
    /// True when `response` is the last candidate's retryable 5xx.
    pub exhausted: bool,
}

/// Routes each request to the preferred healthy backend, failing over on
/// connect errors, timeouts and retryable 5xx responses.
pub struct FailoverRouter<U> {
    pool: Pool,
    tracker: HealthTracker,
    upstream: U,
    retryable: RetryableStatuses,
    all_down: AllDownPolicy,
    metrics: MetricsCollector,
}

impl FailoverRouter<HttpUpstream> {
    /// Build the production router from validated configuration.
    pub fn from_config(config: &Config, metrics: MetricsCollector) -> Self {
        let failover = &config.failover;
        Self::new(
            Pool::from_config(&config.pool),
            HealthTracker::new(HealthPolicy::from(failover)),
            HttpUpstream::new(failover.connect_timeout, failover.response_timeout),
            RetryableStatuses::new(&failover.retryable_statuses),
            failover.all_down,
            metrics,
        )
    }
}

impl<U: Upstream> FailoverRouter<U> {
    pub fn new(
        pool: Pool,
        tracker: HealthTracker,
        upstream: U,
        retryable: RetryableStatuses,
        all_down: AllDownPolicy,
        metrics: MetricsCollector,
    ) -> Self {
        let router = Self {
            pool,
            tracker,
            upstream,
            retryable,
            all_down,
            metrics,
        };
        router.publish_health(Instant::now());
        router
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn tracker(&self) -> &HealthTracker {
        &self.tracker
    }

    /// Backends to try at `now`, in preference order.
    ///
    /// When every backend is DOWN the whole pool is returned (fail open), or
    /// nothing under [`AllDownPolicy::FailFast`].
    pub fn candidates(&self, now: Instant) -> Vec<&Backend> {
        let up: Vec<&Backend> = self
            .pool
            .backends()
            .iter()
            .filter(|b| self.tracker.is_up(b, now))
            .collect();

        if !up.is_empty() {
            return up;
        }

        match self.all_down {
            AllDownPolicy::FailOpen => {
                debug!("all backends down, failing open");
                self.pool.backends().iter().collect()
            }
            AllDownPolicy::FailFast => Vec::new(),
        }
    }

    /// Forward `request`, failing over through the candidates.
    #[instrument(skip_all, fields(method = %request.method(), uri = %request.uri()))]
    pub async fn forward(&self, request: &ForwardRequest) -> Result<Forwarded, ForwardError> {
        let candidates = self.candidates(Instant::now());
        if candidates.is_empty() {
            warn!("all backends down, rejecting request");
            return Err(ForwardError::NoHealthyBackend);
        }

        let mut upstream_statuses = Vec::with_capacity(candidates.len());
        let mut last_failure = None;

        for (index, backend) in candidates.iter().enumerate() {
            let started = Instant::now();
            let result = self.upstream.send(backend, request).await;
            let outcome = RequestOutcome::new(backend.name(), started.elapsed(), &result, &self.retryable);

            upstream_statuses.push(outcome.upstream_status);
            self.metrics.record_attempt(backend.name(), outcome.classification);

            match result {
                Ok(response) if !outcome.classification.is_qualifying_failure() => {
                    self.tracker.record_success(backend);
                    if index > 0 {
                        self.metrics.record_failover(candidates[0].name(), backend.name());
                    }
                    return Ok(Forwarded {
                        response,
                        backend: backend.name().to_string(),
                        role: backend.role(),
                        attempts: index + 1,
                        upstream_statuses,
                        exhausted: false,
                    });
                }
                result => {
                    self.on_failure(backend, &outcome, &result);
                    last_failure = Some((*backend, result));
                }
            }
        }

        match last_failure {
            Some((backend, Ok(response))) => Ok(Forwarded {
                response,
                backend: backend.name().to_string(),
                role: backend.role(),
                attempts: upstream_statuses.len(),
                upstream_statuses,
                exhausted: true,
            }),
            Some((backend, Err(source))) => Err(ForwardError::Upstream {
                backend: backend.name().to_string(),
                source,
                upstream_statuses,
            }),
            None => Err(ForwardError::NoHealthyBackend),
        }
    }

    /// Refresh backend eligibility gauges.
    pub fn publish_health(&self, now: Instant) {
        for backend in self.pool.backends() {
            self.metrics
                .set_backend_up(backend.name(), backend.role(), self.tracker.is_up(backend, now));
        }
    }

    /// Health of every backend in preference order.
    pub fn health_snapshot(&self, now: Instant) -> Vec<BackendHealth> {
        self.pool
            .backends()
            .iter()
            .map(|b| self.tracker.snapshot(b, now))
            .collect()
    }

    fn on_failure(
        &self,
        backend: &Backend,
        outcome: &RequestOutcome,
        result: &Result<Response<Bytes>, UpstreamError>,
    ) {
        if self.tracker.record_failure(backend, Instant::now()) == HealthTransition::MarkedDown {
            self.metrics.set_backend_up(backend.name(), backend.role(), false);
        }

        match result {
            Err(error) => warn!(
                backend = %backend.name(),
                classification = %outcome.classification,
                duration_ms = outcome.duration.as_millis() as u64,
                error = %error,
                "upstream attempt failed"
            ),
            Ok(_) => warn!(
                backend = %backend.name(),
                classification = %outcome.classification,
                status = outcome.upstream_status,
                duration_ms = outcome.duration.as_millis() as u64,
                "upstream returned retryable status"
            ),
        }
    }
}

impl<U: Upstream> crate::metrics::ScrapeHook for FailoverRouter<U> {
    fn before_scrape(&self) {
        self.publish_health(Instant::now());
    }
}
