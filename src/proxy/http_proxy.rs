//! HTTP upstream transport.
//!
//! Every attempt opens its own connection to the backend and gets its own
//! connect and response budgets.

use crate::backend::Backend;
use crate::proxy::{strip_hop_by_hop, ForwardRequest, Upstream};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Transport-level failure talking to a backend.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("failed to connect to backend {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("connection to backend {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("backend {address} did not respond within {timeout:?}")]
    ResponseTimeout { address: String, timeout: Duration },

    #[error("HTTP exchange with backend {address} failed: {source}")]
    Protocol {
        address: String,
        #[source]
        source: hyper::Error,
    },
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            UpstreamError::ConnectTimeout { .. } | UpstreamError::ResponseTimeout { .. }
        )
    }

    /// Status a gateway reports for this failure: 504 for timeouts, 502 otherwise.
    pub fn gateway_status(&self) -> StatusCode {
        if self.is_timeout() {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        }
    }
}

/// Plain HTTP/1.1 upstream over TCP.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl HttpUpstream {
    pub fn new(connect_timeout: Duration, response_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            response_timeout,
        }
    }
}

impl Upstream for HttpUpstream {
    #[instrument(skip_all, fields(backend = %backend.name(), address = %backend.address()))]
    async fn send(
        &self,
        backend: &Backend,
        request: &ForwardRequest,
    ) -> Result<Response<Bytes>, UpstreamError> {
        let address = backend.address();

        let stream = match timeout(self.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(UpstreamError::Connect {
                    address: address.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(UpstreamError::ConnectTimeout {
                    address: address.to_string(),
                    timeout: self.connect_timeout,
                });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on backend connection");
        }

        let exchange = async {
            let (mut sender, conn) =
                hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;

            // Aborted when this attempt finishes or is dropped.
            let _driver = ConnectionDriver(
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        debug!(error = %e, "backend connection closed with error");
                    }
                })
                .abort_handle(),
            );

            let response = sender.send_request(request.to_request(address)).await?;
            let (mut parts, body) = response.into_parts();
            let body = body.collect().await?.to_bytes();

            strip_hop_by_hop(&mut parts.headers);
            Ok::<_, hyper::Error>(Response::from_parts(parts, body))
        };

        match timeout(self.response_timeout, exchange).await {
            Ok(Ok(response)) => {
                debug!(status = response.status().as_u16(), "backend responded");
                Ok(response)
            }
            Ok(Err(source)) => Err(UpstreamError::Protocol {
                address: address.to_string(),
                source,
            }),
            Err(_) => Err(UpstreamError::ResponseTimeout {
                address: address.to_string(),
                timeout: self.response_timeout,
            }),
        }
    }
}

/// Aborts the spawned hyper connection task on drop.
struct ConnectionDriver(AbortHandle);

impl Drop for ConnectionDriver {
    fn drop(&mut self) {
        self.0.abort();
    }
}
