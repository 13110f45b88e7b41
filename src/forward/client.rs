//! Upstream HTTP client.
//!
//! One client serves both legs: the connector speaks TLS for `https://`
//! URIs and plain TCP for `http://` ones.

use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

/// Type alias for the client used for upstream requests.
pub type UpstreamClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Error building the TLS configuration.
#[derive(Debug, thiserror::Error)]
#[error("failed to configure TLS client: {0}")]
pub struct ClientBuildError(#[from] rustls::Error);

/// Create the upstream client, verifying origins against the webpki roots.
///
/// Connections are not kept for reuse; every request dials its upstream.
pub fn create_upstream_client() -> Result<UpstreamClient, ClientBuildError> {
    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())?
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector());

    Ok(build_client(https_connector))
}

/// Create the upstream client with a caller-supplied TLS configuration.
pub fn create_upstream_client_with_tls(tls: rustls::ClientConfig) -> UpstreamClient {
    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector());

    build_client(https_connector)
}

/// The attempt deadline in the engine bounds connecting; the connector has none.
fn http_connector() -> HttpConnector {
    let mut http_connector = HttpConnector::new();
    http_connector.enforce_http(false);
    http_connector.set_nodelay(true);
    http_connector
}

fn build_client(connector: hyper_rustls::HttpsConnector<HttpConnector>) -> UpstreamClient {
    Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(0)
        .build(connector)
}
