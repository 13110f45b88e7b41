//! The forwarding engine: HTTPS first, plaintext HTTP on transport failure.
//!
//! ```text
//! Received → BodyCollected → HttpsAttempted ─┬─▶ Relayed
//!                                            └─▶ HttpFallbackAttempted ─┬─▶ Relayed
//!                                                                       └─▶ ErrorResponded
//! ```
//!
//! Only a connect, TLS or protocol failure triggers the fallback. An attempt
//! that stalls past the timeout is answered with a 503 and never replayed, and
//! an upstream error status is a response like any other and is relayed.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::Response;
use hyper::body::Incoming;

use crate::forward::client::{
    create_upstream_client, create_upstream_client_with_tls, ClientBuildError, UpstreamClient,
};
use crate::forward::target::{UpstreamScheme, UpstreamTarget};
use crate::http::request::{InboundRequest, OutboundRequest};
use crate::http::response::{error_response, relay, rewrite_redirect, RewriteError};
use crate::observability::metrics;

/// Why an upstream attempt produced no response.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// The derived URL is not a valid absolute URI.
    #[error("invalid upstream url {url}: {source}")]
    InvalidTarget {
        url: String,
        source: hyper::http::uri::InvalidUri,
    },

    /// Connect, TLS or protocol failure before response headers arrived.
    #[error("upstream transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    /// No response headers within the configured timeout.
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    /// The response arrived but could not be prepared for the caller.
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
}

impl ForwardError {
    /// Whether the upstream could not be reached or spoken to.
    ///
    /// A timeout is not one of these: the request may already have been
    /// delivered, so repeating it is unsafe.
    pub fn is_transport(&self) -> bool {
        matches!(self, ForwardError::Transport(_))
    }
}

/// Terminal state of one request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Relayed(UpstreamScheme),
    ErrorResponded,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Relayed(scheme) => scheme.as_str(),
            Outcome::ErrorResponded => "error",
        }
    }
}

/// Forwards collected requests upstream and shapes what the caller gets back.
#[derive(Clone)]
pub struct ForwardingEngine {
    client: UpstreamClient,
    timeout: Duration,
}

impl ForwardingEngine {
    /// Create an engine whose upstream attempts time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ClientBuildError> {
        Ok(Self {
            client: create_upstream_client()?,
            timeout,
        })
    }

    /// Like [`new`](Self::new), trusting origins per the given TLS configuration.
    pub fn with_tls(timeout: Duration, tls: rustls::ClientConfig) -> Self {
        Self {
            client: create_upstream_client_with_tls(tls),
            timeout,
        }
    }

    /// Deadline for one upstream attempt to produce response headers.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forward one request and produce the caller's response.
    ///
    /// Never fails: every error becomes a 503.
    pub async fn forward(&self, inbound: InboundRequest) -> Response<Body> {
        let start = Instant::now();
        let outbound = inbound.outbound();
        let target = UpstreamTarget::derive(&inbound.target);

        let (response, outcome) = self.dispatch(&target, &outbound).await;
        metrics::record_request(
            inbound.method.as_str(),
            response.status().as_u16(),
            outcome.label(),
            start,
        );
        response
    }

    async fn dispatch(
        &self,
        target: &UpstreamTarget,
        outbound: &OutboundRequest,
    ) -> (Response<Body>, Outcome) {
        let err = match self.attempt(target, outbound).await {
            Ok(response) => return (response, Outcome::Relayed(UpstreamScheme::Https)),
            Err(e) => e,
        };

        if !err.is_transport() {
            tracing::error!(url = %target, error = %err, status = 503, "Dispatch failed");
            return (error_response(503), Outcome::ErrorResponded);
        }

        tracing::warn!(url = %target, error = %err, "HTTPS attempt failed, falling back to HTTP");
        metrics::record_fallback();

        let fallback = target.to_plaintext();
        match self.attempt(&fallback, outbound).await {
            Ok(response) => (response, Outcome::Relayed(UpstreamScheme::Http)),
            Err(e) => {
                tracing::warn!(url = %fallback, error = %e, status = 503, "HTTP fallback failed");
                (error_response(503), Outcome::ErrorResponded)
            }
        }
    }

    /// One upstream attempt. Redirects are rewritten on HTTPS attempts only.
    async fn attempt(
        &self,
        target: &UpstreamTarget,
        outbound: &OutboundRequest,
    ) -> Result<Response<Body>, ForwardError> {
        let uri = target.to_uri().map_err(|source| ForwardError::InvalidTarget {
            url: target.url(),
            source,
        })?;

        let request = outbound.to_request(uri);
        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| ForwardError::Timeout(self.timeout))??;

        let response = prepare(target.scheme(), response)?;
        tracing::info!(status = response.status().as_u16(), url = %target, "Relaying upstream response");
        Ok(relay(response))
    }
}

fn prepare(scheme: UpstreamScheme, mut response: Response<Incoming>) -> Result<Response<Incoming>, RewriteError> {
    if scheme == UpstreamScheme::Https {
        let status = response.status();
        rewrite_redirect(status, response.headers_mut())?;
    }
    Ok(response)
}
