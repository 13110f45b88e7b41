//! ospxy: a plaintext-in, HTTPS-out forward proxy.
//!
//! Requests arrive over plain HTTP/1.1. Each target is reissued as HTTPS; if
//! that attempt cannot connect or speak to the upstream, it is repeated once
//! over plain HTTP.
//! Redirects returned over HTTPS are pointed back at `http://` so callers keep
//! talking to the proxy.

pub mod config;
pub mod forward;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::{ProxyConfig, ServerConfig};
pub use forward::ForwardingEngine;
pub use http::{ProxyServer, ServerError};
pub use lifecycle::Shutdown;
