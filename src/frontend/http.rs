//! Per-request handling for the inbound HTTP listener.

use crate::alert::{AlertHandle, ServedRecord};
use crate::backend::{FailoverRouter, ForwardError, Forwarded};
use crate::config::Role;
use crate::metrics::MetricsCollector;
use crate::proxy::{ForwardRequest, Upstream};
use crate::util::{RequestId, REQUEST_ID_HEADER};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Label used in metrics when no backend answered.
const NO_BACKEND: &str = "none";

/// Shared state for every request accepted by a listener.
pub(crate) struct HttpHandler<U> {
    router: Arc<FailoverRouter<U>>,
    metrics: MetricsCollector,
    alerts: Option<AlertHandle>,
    max_body_size: usize,
}

/// The client-facing result of one request, plus what the access log and
/// the alert watcher need to know about it.
struct Served {
    response: Response<Full<Bytes>>,
    /// Backend the response came from, or whose transport failed last.
    backend: Option<String>,
    upstream_addr: Option<String>,
    role: Option<Role>,
    /// True when a backend produced `response`.
    answered: bool,
    /// True when `response` is a retryable 5xx that no backend could improve on.
    exhausted: bool,
    pool: Option<String>,
    release: Option<String>,
    upstream_statuses: Vec<u16>,
    attempts: usize,
}

impl Served {
    /// What the alert watcher sees for this request.
    fn record(&self) -> ServedRecord {
        ServedRecord {
            pool: if self.answered {
                self.pool.clone().or_else(|| self.backend.clone())
            } else {
                None
            },
            upstream_statuses: self.upstream_statuses.clone(),
            status: self.response.status().as_u16(),
        }
    }
}

impl<U: Upstream> HttpHandler<U> {
    pub(crate) fn new(
        router: Arc<FailoverRouter<U>>,
        metrics: MetricsCollector,
        alerts: Option<AlertHandle>,
        max_body_size: usize,
    ) -> Self {
        Self {
            router,
            metrics,
            alerts,
            max_body_size,
        }
    }

    /// Buffer, forward and answer one client request.
    pub(crate) async fn handle<B>(&self, req: Request<B>, client_addr: SocketAddr) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let _active = self.metrics.track_active();
        let started = Instant::now();
        let request_id = RequestId::from_headers(req.headers());
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let (mut parts, body) = req.into_parts();
        let body = match Limited::new(body, self.max_body_size).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let status = if e.downcast_ref::<LengthLimitError>().is_some() {
                    StatusCode::PAYLOAD_TOO_LARGE
                } else {
                    StatusCode::BAD_REQUEST
                };
                warn!(
                    request_id = %request_id,
                    client = %client_addr,
                    status = status.as_u16(),
                    error = %e,
                    "failed to read request body"
                );
                self.metrics
                    .record_request(NO_BACKEND, method.as_str(), status.as_u16(), started.elapsed());
                return error_response(status);
            }
        };

        if let Some(value) = request_id.header_value() {
            parts.headers.insert(REQUEST_ID_HEADER, value);
        }
        let request = ForwardRequest::from_client(parts, body, client_addr);
        let served = self.serve(self.router.forward(&request).await);

        let status = served.response.status().as_u16();
        let elapsed = started.elapsed();
        self.metrics.record_request(
            served.backend.as_deref().unwrap_or(NO_BACKEND),
            method.as_str(),
            status,
            elapsed,
        );

        info!(
            request_id = %request_id,
            client = %client_addr,
            method = %method,
            path = %path,
            status,
            pool = served.pool.as_deref().unwrap_or("-"),
            release = served.release.as_deref().unwrap_or("-"),
            upstream_addr = served.upstream_addr.as_deref().unwrap_or("-"),
            role = served.role.as_ref().map(Role::as_str).unwrap_or("-"),
            upstream_status = %join_statuses(&served.upstream_statuses),
            attempts = served.attempts,
            exhausted = served.exhausted,
            request_time_ms = elapsed.as_millis() as u64,
            "request completed"
        );

        if let Some(ref alerts) = self.alerts {
            alerts.observe(served.record());
        }

        served.response
    }

    fn serve(&self, result: Result<Forwarded, ForwardError>) -> Served {
        match result {
            Ok(forwarded) => {
                let header = |name: &str| {
                    forwarded
                        .response
                        .headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                let pool = header("x-app-pool");
                let release = header("x-release-id");

                Served {
                    upstream_addr: self.address_of(&forwarded.backend),
                    backend: Some(forwarded.backend),
                    role: Some(forwarded.role),
                    answered: true,
                    exhausted: forwarded.exhausted,
                    pool,
                    release,
                    attempts: forwarded.attempts,
                    upstream_statuses: forwarded.upstream_statuses,
                    response: forwarded.response.map(Full::new),
                }
            }
            Err(ForwardError::Upstream {
                backend,
                source,
                upstream_statuses,
            }) => Served {
                response: error_response(source.gateway_status()),
                upstream_addr: self.address_of(&backend),
                role: self.router.pool().get(&backend).map(|b| b.role()),
                backend: Some(backend),
                answered: false,
                exhausted: false,
                pool: None,
                release: None,
                attempts: upstream_statuses.len(),
                upstream_statuses,
            },
            Err(ForwardError::NoHealthyBackend) => Served {
                response: error_response(StatusCode::SERVICE_UNAVAILABLE),
                backend: None,
                upstream_addr: None,
                role: None,
                answered: false,
                exhausted: false,
                pool: None,
                release: None,
                upstream_statuses: Vec::new(),
                attempts: 0,
            },
        }
    }

    fn address_of(&self, backend: &str) -> Option<String> {
        self.router.pool().get(backend).map(|b| b.address().to_string())
    }
}

/// Render attempt statuses the way nginx's `$upstream_status` does.
fn join_statuses(statuses: &[u16]) -> String {
    if statuses.is_empty() {
        return "-".to_string();
    }
    statuses
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Plain-text response generated by the proxy itself.
fn error_response(status: StatusCode) -> Response<Full<Bytes>> {
    let body = format!(
        "{} {}\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
