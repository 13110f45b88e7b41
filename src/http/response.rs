//! Response handling for the caller.
//!
//! # Responsibilities
//! - Relay an upstream response (status, headers, streamed body)
//! - Rewrite redirect targets back to plaintext for HTTPS attempts
//! - Synthesize the fixed-shape error response
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Upstream headers are passed through untouched apart from `location`
//! - Every upstream failure reaches the caller as a bodiless 503

use axum::body::Body;
use axum::http::header::{HeaderValue, CONTENT_LENGTH, DATE, LOCATION, SERVER};
use axum::http::{HeaderMap, Response, StatusCode};
use hyper::body::Incoming;

/// Value of the `server` header on synthesized responses.
pub const SERVER_NAME: &str = "ospxy";

/// Marks a request cycle that must end without any response.
///
/// The connection layer closes the connection when it sees this extension.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("request cycle abandoned")]
pub struct AbandonedCycle;

impl AbandonedCycle {
    pub fn response() -> Response<Body> {
        let mut response = Response::new(Body::empty());
        response.extensions_mut().insert(AbandonedCycle);
        response
    }
}

/// The rewritten `location` value was not a valid header.
#[derive(Debug, thiserror::Error)]
#[error("rewritten location header is invalid: {0}")]
pub struct RewriteError(#[from] axum::http::header::InvalidHeaderValue);

/// Point an HTTPS redirect back at plain HTTP.
///
/// Applies only to 3xx responses whose first `location` value is non-blank and
/// starts with `https://`. Only the scheme prefix changes. Returns whether a
/// rewrite happened.
pub fn rewrite_redirect(status: StatusCode, headers: &mut HeaderMap) -> Result<bool, RewriteError> {
    if !status.is_redirection() {
        return Ok(false);
    }
    let Some(location) = headers.get_mut(LOCATION) else {
        return Ok(false);
    };
    if location.as_bytes().iter().all(u8::is_ascii_whitespace) {
        return Ok(false);
    }
    let Some(rest) = location.as_bytes().strip_prefix(b"https://") else {
        return Ok(false);
    };

    let mut rewritten = Vec::with_capacity(rest.len() + 7);
    rewritten.extend_from_slice(b"http://");
    rewritten.extend_from_slice(rest);
    *location = HeaderValue::from_bytes(&rewritten)?;
    Ok(true)
}

/// Hand the upstream response to the caller.
///
/// Status and headers are written once by the server; the body is streamed
/// through as it arrives, so a slow caller slows reads from the upstream. An
/// upstream that stalls mid-body is cut off by the router's body timeout.
pub fn relay(response: Response<Incoming>) -> Response<Body> {
    response.map(Body::new)
}

/// Build the minimal error response.
///
/// Status codes outside the valid range become 500.
pub fn error_response(status: u16) -> Response<Body> {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    if let Ok(date) = HeaderValue::from_str(&timestamp()) {
        headers.insert(DATE, date);
    }
    response
}

/// Current UTC time as ISO 8601 with milliseconds, e.g. `2024-05-01T12:00:00.000Z`.
fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
