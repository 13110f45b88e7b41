//! Shared utilities for integration tests.
//!
//! Mock origins speak plain HTTP. By default a TLS ClientHello gets the
//! connection dropped, which makes the proxy's HTTPS attempt fail and its HTTP
//! fallback run. Other origins stall the handshake or complete it with a
//! self-signed certificate the proxy is told to trust.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ospxy::{ProxyServer, ServerConfig};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

const TLS_HANDSHAKE: u8 = 0x16;
const HOLD: Duration = Duration::from_secs(30);

/// A request as seen by a mock origin.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A running mock origin.
#[derive(Clone)]
pub struct MockOrigin {
    pub addr: SocketAddr,
    tls_attempts: Arc<AtomicUsize>,
    http_requests: Arc<AtomicUsize>,
    https_requests: Arc<AtomicUsize>,
}

impl MockOrigin {
    /// TLS handshakes started against this origin.
    pub fn tls_attempts(&self) -> usize {
        self.tls_attempts.load(Ordering::SeqCst)
    }

    /// Requests received over plain HTTP.
    pub fn http_requests(&self) -> usize {
        self.http_requests.load(Ordering::SeqCst)
    }

    /// Requests received over TLS.
    pub fn https_requests(&self) -> usize {
        self.https_requests.load(Ordering::SeqCst)
    }

    /// Absolute URL on this origin, as a proxy client would send it.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

type Handler = Arc<dyn Fn(MockRequest) -> Vec<u8> + Send + Sync>;

#[derive(Clone)]
enum TlsMode {
    Refuse,
    Stall,
    Accept(TlsAcceptor),
}

#[derive(Clone)]
struct Behavior {
    handler: Option<Handler>,
    tls: TlsMode,
    hold_open: bool,
}

/// Start a plaintext origin answering every request with `handler`'s raw response.
pub async fn start_origin<F>(handler: F) -> MockOrigin
where
    F: Fn(MockRequest) -> Vec<u8> + Send + Sync + 'static,
{
    spawn_origin(Behavior {
        handler: Some(Arc::new(handler)),
        tls: TlsMode::Refuse,
        hold_open: false,
    })
    .await
}

/// Start a plaintext origin that reads requests but never answers.
pub async fn start_silent_origin() -> MockOrigin {
    spawn_origin(Behavior {
        handler: None,
        tls: TlsMode::Refuse,
        hold_open: false,
    })
    .await
}

/// Start an origin that reads the ClientHello and then goes quiet, while still
/// answering plain HTTP with `handler`.
pub async fn start_tls_stalling_origin<F>(handler: F) -> MockOrigin
where
    F: Fn(MockRequest) -> Vec<u8> + Send + Sync + 'static,
{
    spawn_origin(Behavior {
        handler: Some(Arc::new(handler)),
        tls: TlsMode::Stall,
        hold_open: false,
    })
    .await
}

/// Start a plaintext origin that writes `handler`'s bytes and then keeps the
/// connection open without sending more.
pub async fn start_stalling_origin<F>(handler: F) -> MockOrigin
where
    F: Fn(MockRequest) -> Vec<u8> + Send + Sync + 'static,
{
    spawn_origin(Behavior {
        handler: Some(Arc::new(handler)),
        tls: TlsMode::Refuse,
        hold_open: true,
    })
    .await
}

/// Start an origin serving `handler` over TLS with a fresh self-signed
/// certificate. Returns a client configuration that trusts it.
pub async fn start_tls_origin<F>(handler: F) -> (MockOrigin, rustls::ClientConfig)
where
    F: Fn(MockRequest) -> Vec<u8> + Send + Sync + 'static,
{
    let (acceptor, client_tls) = self_signed_tls();
    let origin = spawn_origin(Behavior {
        handler: Some(Arc::new(handler)),
        tls: TlsMode::Accept(acceptor),
        hold_open: false,
    })
    .await;
    (origin, client_tls)
}

fn self_signed_tls() -> (TlsAcceptor, rustls::ClientConfig) {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let params = rcgen::CertificateParams::new(vec!["127.0.0.1".to_string(), "localhost".to_string()]).unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    let cert_der = cert.der().clone();
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let server = rustls::ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], key_der)
        .unwrap();

    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert_der).unwrap();
    let client = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();

    (TlsAcceptor::from(Arc::new(server)), client)
}

async fn spawn_origin(behavior: Behavior) -> MockOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = MockOrigin {
        addr: listener.local_addr().unwrap(),
        tls_attempts: Arc::new(AtomicUsize::new(0)),
        http_requests: Arc::new(AtomicUsize::new(0)),
        https_requests: Arc::new(AtomicUsize::new(0)),
    };

    let state = origin.clone();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { break };
            let state = state.clone();
            let behavior = behavior.clone();
            tokio::spawn(async move {
                handle_origin_connection(socket, state, behavior).await;
            });
        }
    });

    origin
}

async fn handle_origin_connection(socket: TcpStream, state: MockOrigin, behavior: Behavior) {
    let mut first = [0u8; 1];
    match socket.peek(&mut first).await {
        Ok(0) | Err(_) => return,
        Ok(_) => {}
    }

    if first[0] != TLS_HANDSHAKE {
        serve_http(socket, &state.http_requests, &behavior).await;
        return;
    }

    state.tls_attempts.fetch_add(1, Ordering::SeqCst);
    match &behavior.tls {
        TlsMode::Refuse => {}
        TlsMode::Stall => {
            let _held = socket;
            tokio::time::sleep(HOLD).await;
        }
        TlsMode::Accept(acceptor) => {
            if let Ok(stream) = acceptor.accept(socket).await {
                serve_http(stream, &state.https_requests, &behavior).await;
            }
        }
    }
}

async fn serve_http<S>(mut stream: S, counter: &AtomicUsize, behavior: &Behavior)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter(|l| !l.is_empty())
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    counter.fetch_add(1, Ordering::SeqCst);

    let Some(handler) = &behavior.handler else {
        tokio::time::sleep(HOLD).await;
        return;
    };

    let response = handler(MockRequest {
        method,
        target,
        headers,
        body,
    });
    let _ = stream.write_all(&response).await;
    let _ = stream.flush().await;
    if behavior.hold_open {
        tokio::time::sleep(HOLD).await;
    }
    let _ = stream.shutdown().await;
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Raw HTTP/1.1 response with a content length. The origin closes after writing it.
pub fn http_response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

/// Start a proxy on an ephemeral local port.
pub async fn start_proxy() -> (ProxyServer, SocketAddr) {
    start_proxy_with(|_| {}).await
}

/// Start a proxy after adjusting its configuration.
pub async fn start_proxy_with(adjust: impl FnOnce(&mut ServerConfig)) -> (ProxyServer, SocketAddr) {
    launch(ProxyServer::new(test_config(adjust))).await
}

/// Start a proxy whose HTTPS attempts trust `tls` instead of the public roots.
pub async fn start_proxy_trusting(tls: rustls::ClientConfig) -> (ProxyServer, SocketAddr) {
    launch(ProxyServer::new(test_config(|_| {})).with_upstream_tls(tls)).await
}

fn test_config(adjust: impl FnOnce(&mut ServerConfig)) -> ServerConfig {
    let mut config = ServerConfig::with_bind_address("127.0.0.1:0".parse().unwrap());
    config.timeout = Duration::from_secs(5);
    adjust(&mut config);
    config
}

async fn launch(mut server: ProxyServer) -> (ProxyServer, SocketAddr) {
    let addr = server.start().await.expect("proxy should start");
    (server, addr)
}

/// A client that sends absolute-form requests through the proxy.
pub fn proxied_client(proxy: SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{proxy}")).unwrap())
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
