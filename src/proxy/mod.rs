//! Upstream transport and attempt classification.

mod http_proxy;
mod outcome;
mod request;

pub use http_proxy::{HttpUpstream, UpstreamError};
pub use outcome::{Classification, RequestOutcome, RetryableStatuses};
pub use request::ForwardRequest;

pub(crate) use request::strip_hop_by_hop;

use crate::backend::Backend;
use bytes::Bytes;
use hyper::Response;
use std::future::Future;

/// Delivers one attempt of a request to one backend.
///
/// Implementations enforce their own per-attempt timeouts. Dropping the
/// returned future must abort the attempt.
pub trait Upstream: Send + Sync + 'static {
    fn send(
        &self,
        backend: &Backend,
        request: &ForwardRequest,
    ) -> impl Future<Output = Result<Response<Bytes>, UpstreamError>> + Send;
}
