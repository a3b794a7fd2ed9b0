//! Request ID propagation for request tracing.
//!
//! An inbound `x-request-id` is reused so a request can be followed from the
//! client through the proxy to the backend; otherwise a UUID v4 is minted.

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

/// Header carrying the request ID.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Longest inbound ID that is reused as is.
const MAX_INBOUND_LEN: usize = 128;

/// Request ID wrapper that can be included in tracing spans.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    /// Create a new random request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reuse the inbound `x-request-id` when it is usable, else mint one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= MAX_INBOUND_LEN)
            .map(|v| Self(v.to_string()))
            .unwrap_or_default()
    }

    /// Get the request ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Header value for forwarding upstream.
    pub fn header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0).ok()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
