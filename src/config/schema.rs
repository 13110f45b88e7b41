//! Configuration schema definitions.
//!
//! `ProxyConfig` mirrors the on-disk `ospxy.json` layout. Every field is
//! optional; defaults are resolved in one place (the accessors below) and
//! semantic checks live in `validation.rs`.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port used when no configuration file is found.
pub const DEFAULT_HTTP_PORT: u16 = 3128;

/// Bind address used when `httpBindAddr` is absent.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// Socket timeout (30 seconds).
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Keep-alive timeout (2.5 seconds).
pub const DEFAULT_KEEP_ALIVE_TIMEOUT_MS: u64 = 2_500;

/// Root configuration as read from disk.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Listening port. Required for the listener to start.
    pub http_port: Option<PortValue>,

    /// Bind address (e.g. "0.0.0.0").
    pub http_bind_addr: Option<String>,

    /// Socket timeout in milliseconds.
    pub timeout: Option<u64>,

    /// Keep-alive timeout in milliseconds.
    pub keep_alive_timeout: Option<u64>,

    /// Optional cap on concurrent inbound connections.
    pub max_connections: Option<usize>,

    /// Address for the Prometheus scrape endpoint. Metrics are off when unset.
    pub metrics_address: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            http_port: Some(PortValue::Number(DEFAULT_HTTP_PORT as i64)),
            http_bind_addr: None,
            timeout: None,
            keep_alive_timeout: None,
            max_connections: None,
            metrics_address: None,
        }
    }
}

impl ProxyConfig {
    /// Bind address with surrounding whitespace removed, or the default.
    pub fn bind_addr(&self) -> &str {
        match self.http_bind_addr.as_deref().map(str::trim) {
            Some(addr) if !addr.is_empty() => addr,
            _ => DEFAULT_BIND_ADDR,
        }
    }

    /// Socket timeout. Zero counts as unset.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(non_zero_or(self.timeout, DEFAULT_TIMEOUT_MS))
    }

    /// Keep-alive timeout. Zero counts as unset.
    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(non_zero_or(
            self.keep_alive_timeout,
            DEFAULT_KEEP_ALIVE_TIMEOUT_MS,
        ))
    }
}

fn non_zero_or(value: Option<u64>, default: u64) -> u64 {
    match value {
        Some(v) if v > 0 => v,
        _ => default,
    }
}

/// A port as it may appear in the file: `3128` or `"3128"`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum PortValue {
    Number(i64),
    Text(String),
}

/// Validated settings the server runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address to bind the listening socket to.
    pub bind_address: SocketAddr,

    /// Maximum concurrent connections; `None` means unbounded.
    pub max_connections: Option<usize>,

    /// Idle time allowed between requests on one connection.
    pub keep_alive_timeout: Duration,

    /// Upper bound on each upstream attempt until response headers arrive.
    pub timeout: Duration,
}

impl ServerConfig {
    /// Settings for the given address with every other value at its default.
    pub fn with_bind_address(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            max_connections: None,
            keep_alive_timeout: Duration::from_millis(DEFAULT_KEEP_ALIVE_TIMEOUT_MS),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}
