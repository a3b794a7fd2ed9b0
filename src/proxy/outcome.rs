//! Classification of upstream attempts.

use crate::proxy::UpstreamError;
use bytes::Bytes;
use hyper::{Response, StatusCode};
use std::time::Duration;

/// Statuses that count as qualifying failures and trigger failover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableStatuses {
    statuses: Vec<u16>,
}

impl RetryableStatuses {
    pub fn new(statuses: &[u16]) -> Self {
        let mut statuses = statuses.to_vec();
        statuses.sort_unstable();
        statuses.dedup();
        Self { statuses }
    }

    pub fn contains(&self, status: StatusCode) -> bool {
        self.statuses.binary_search(&status.as_u16()).is_ok()
    }
}

impl Default for RetryableStatuses {
    fn default() -> Self {
        Self::new(&[500, 502, 503, 504])
    }
}

/// How a single attempt against a backend ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Any response that is neither a client error nor a retryable 5xx.
    Success,
    /// Connection refused, reset, or the HTTP exchange broke.
    ConnectError,
    /// Connect or response bound elapsed.
    Timeout,
    /// 5xx in the retryable set.
    ServerError,
    /// 4xx; forwarded verbatim, never retried.
    ClientError,
    /// 5xx outside the retryable set; forwarded verbatim, never retried.
    Other,
}

impl Classification {
    pub fn of(
        result: &Result<Response<Bytes>, UpstreamError>,
        retryable: &RetryableStatuses,
    ) -> Self {
        match result {
            Ok(response) => Self::from_status(response.status(), retryable),
            Err(error) if error.is_timeout() => Classification::Timeout,
            Err(_) => Classification::ConnectError,
        }
    }

    pub fn from_status(status: StatusCode, retryable: &RetryableStatuses) -> Self {
        if retryable.contains(status) {
            Classification::ServerError
        } else if status.is_client_error() {
            Classification::ClientError
        } else if status.is_server_error() {
            Classification::Other
        } else {
            Classification::Success
        }
    }

    /// Whether this outcome feeds the failure counter and moves on to the next backend.
    pub fn is_qualifying_failure(self) -> bool {
        matches!(
            self,
            Classification::ConnectError | Classification::Timeout | Classification::ServerError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Success => "success",
            Classification::ConnectError => "connect_error",
            Classification::Timeout => "timeout",
            Classification::ServerError => "server_error",
            Classification::ClientError => "client_error",
            Classification::Other => "other",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt against one backend. Transient: logged, counted, dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    pub backend: String,
    pub duration: Duration,
    pub classification: Classification,
    /// Status as an access log would show it: the real one, or 502/504 for
    /// transport failures.
    pub upstream_status: u16,
}

impl RequestOutcome {
    pub fn new(
        backend: &str,
        duration: Duration,
        result: &Result<Response<Bytes>, UpstreamError>,
        retryable: &RetryableStatuses,
    ) -> Self {
        let upstream_status = match result {
            Ok(response) => response.status().as_u16(),
            Err(error) => error.gateway_status().as_u16(),
        };

        Self {
            backend: backend.to_string(),
            duration,
            classification: Classification::of(result, retryable),
            upstream_status,
        }
    }
}
