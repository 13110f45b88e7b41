//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ospxy_requests_total` (counter): requests by method, status, upstream leg
//! - `ospxy_request_duration_seconds` (histogram): time to response headers
//! - `ospxy_https_fallbacks_total` (counter): HTTPS attempts that fell back to HTTP
//! - `ospxy_active_connections` (gauge): open inbound connections
//!
//! Recording is a no-op until a recorder is installed with [`init_metrics`].

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one completed request cycle.
pub fn record_request(method: &str, status: u16, upstream: &'static str, start: Instant) {
    metrics::counter!(
        "ospxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "upstream" => upstream
    )
    .increment(1);
    metrics::histogram!("ospxy_request_duration_seconds", "upstream" => upstream)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_fallback() {
    metrics::counter!("ospxy_https_fallbacks_total").increment(1);
}

pub fn set_active_connections(count: u64) {
    metrics::gauge!("ospxy_active_connections").set(count as f64);
}
