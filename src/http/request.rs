//! Inbound request capture.
//!
//! # Responsibilities
//! - Drain the inbound body into one contiguous buffer
//! - Snapshot method, target and headers for forwarding
//! - Build the outbound request for each upstream attempt
//!
//! # Design Decisions
//! - The body is fully buffered so the HTTP fallback can replay it
//! - An empty body is an empty buffer, never absent
//! - Headers are forwarded exactly as received

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, Uri};
use bytes::Bytes;
use http_body_util::Full;

/// Failure while draining the inbound body.
#[derive(Debug, thiserror::Error)]
#[error("failed to read request body: {0}")]
pub struct BodyError(#[from] axum::Error);

/// Collect every body chunk into a single buffer.
pub async fn collect_body(body: Body) -> Result<Bytes, BodyError> {
    Ok(axum::body::to_bytes(body, usize::MAX).await?)
}

/// A received request with its body fully collected.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Request target as received (absolute URL or origin-form path).
    pub target: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    /// Drain the body of `request` and capture the rest of it.
    pub async fn collect(request: Request<Body>) -> Result<Self, BodyError> {
        let (parts, body) = request.into_parts();
        let body = collect_body(body).await?;

        Ok(Self {
            method: parts.method,
            target: parts.uri.to_string(),
            headers: parts.headers,
            body,
        })
    }

    /// Method, headers and body to replay against each upstream.
    pub fn outbound(&self) -> OutboundRequest {
        OutboundRequest {
            method: self.method.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// The request sent upstream. Reused unchanged for the fallback attempt.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OutboundRequest {
    /// Build a client request for `uri`. The body buffer is shared, not copied.
    pub fn to_request(&self, uri: Uri) -> Request<Full<Bytes>> {
        let mut request = Request::new(Full::new(self.body.clone()));
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = uri;
        *request.headers_mut() = self.headers.clone();
        request
    }
}
