//! Replayable upstream requests.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::http::uri;
use hyper::{Method, Request, Uri, Version};
use std::net::SocketAddr;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// An inbound request with its body buffered, so it can be sent to more than
/// one backend.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl ForwardRequest {
    /// Build from raw parts. Only the path and query of `uri` are kept.
    pub fn new(method: Method, uri: &Uri, mut headers: HeaderMap, body: Bytes) -> Self {
        strip_hop_by_hop(&mut headers);
        Self {
            method,
            uri: origin_form(uri),
            headers,
            body,
        }
    }

    /// Build from a client request, adding `X-Forwarded-For` and `X-Real-IP`.
    pub fn from_client(
        parts: hyper::http::request::Parts,
        body: Bytes,
        client_addr: SocketAddr,
    ) -> Self {
        let mut request = Self::new(parts.method, &parts.uri, parts.headers, body);
        let client_ip = client_addr.ip().to_string();

        let forwarded_for = match request
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => format!("{}, {}", existing, client_ip),
            None => client_ip.clone(),
        };
        if let Ok(value) = HeaderValue::try_from(forwarded_for) {
            request.headers.insert("x-forwarded-for", value);
        }
        if let Ok(value) = HeaderValue::try_from(client_ip) {
            request.headers.insert("x-real-ip", value);
        }

        request
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path and query as sent upstream.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// HTTP/1.1 request for one attempt against `backend_address`.
    pub fn to_request(&self, backend_address: &str) -> Request<Full<Bytes>> {
        let mut request = Request::new(Full::new(self.body.clone()));
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.version_mut() = Version::HTTP_11;
        *request.headers_mut() = self.headers.clone();

        if !request.headers().contains_key(header::HOST) {
            if let Ok(host) = HeaderValue::from_str(backend_address) {
                request.headers_mut().insert(header::HOST, host);
            }
        }

        request
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}

fn origin_form(uri: &Uri) -> Uri {
    let mut parts = uri::Parts::default();
    parts.path_and_query = Some(
        uri.path_and_query()
            .cloned()
            .unwrap_or_else(|| uri::PathAndQuery::from_static("/")),
    );
    Uri::from_parts(parts).unwrap_or_else(|_| Uri::from_static("/"))
}
