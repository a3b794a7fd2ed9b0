//! Prometheus metrics HTTP server.
//!
//! Serves metrics on a configurable HTTP endpoint.

use crate::metrics::MetricsCollector;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus_client::encoding::text::encode;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Refreshes derived metrics right before they are encoded.
pub trait ScrapeHook: Send + Sync {
    fn before_scrape(&self);
}

/// Prometheus metrics HTTP server.
pub struct MetricsServer {
    /// Metrics listener.
    listener: TcpListener,
    /// Path for metrics endpoint.
    path: String,
    /// Metrics collector.
    collector: MetricsCollector,
    /// Invoked before every scrape.
    hook: Option<Arc<dyn ScrapeHook>>,
}

impl MetricsServer {
    /// Bind the metrics server.
    pub async fn bind(
        address: SocketAddr,
        path: String,
        collector: MetricsCollector,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            path,
            collector,
            hook: None,
        })
    }

    pub fn with_hook(mut self, hook: Arc<dyn ScrapeHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the metrics server until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(address = ?self.listener.local_addr().ok(), path = %self.path, "metrics server started");

        let state = Arc::new(ScrapeState {
            collector: self.collector,
            path: self.path,
            hook: self.hook,
        });

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let state = Arc::clone(&state);

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let state = Arc::clone(&state);
                                    async move { handle_request(req, &state).await }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(error = %e, "metrics connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept metrics connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("metrics server shutting down");
                    break;
                }
            }
        }
    }
}

struct ScrapeState {
    collector: MetricsCollector,
    path: String,
    hook: Option<Arc<dyn ScrapeHook>>,
}

/// Handle an incoming metrics request.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: &ScrapeState,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();
    let method = req.method();

    debug!(path = %path, method = %method, "metrics request");

    if method != Method::GET {
        return Ok(text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n".to_string()));
    }

    if path == state.path {
        if let Some(ref hook) = state.hook {
            hook.before_scrape();
        }

        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, state.collector.registry()) {
            error!(error = %e, "failed to encode metrics");
            return Ok(text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics\n".to_string(),
            ));
        }

        let mut response = text_response(StatusCode::OK, buffer);
        response.headers_mut().insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        );
        Ok(response)
    } else if path == "/health" || path == "/healthz" {
        Ok(text_response(StatusCode::OK, "OK\n".to_string()))
    } else {
        Ok(text_response(StatusCode::NOT_FOUND, "Not found\n".to_string()))
    }
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
