//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Create Axum Router with the forwarding handler
//! - Wire up middleware (tracing, panic containment)
//! - Own the listening socket and the accept loop
//! - Serve each connection over HTTP/1.1 with keep-alive
//! - Bound idle waits: request head and body frames by the socket timeout,
//!   the gap between requests by the keep-alive timeout
//! - Close: stop accepting and terminate every open connection

use std::any::Any;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response},
    Router,
};
use bytes::Bytes;
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpStream;
use tokio::task::{JoinHandle, JoinSet};
use tower::ServiceExt;
use tower_http::{
    catch_panic::CatchPanicLayer,
    timeout::{RequestBodyTimeoutLayer, ResponseBodyTimeoutLayer},
    trace::TraceLayer,
};
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::forward::client::ClientBuildError;
use crate::forward::ForwardingEngine;
use crate::http::request::InboundRequest;
use crate::http::response::{error_response, AbandonedCycle};
use crate::lifecycle::Shutdown;
use crate::net::{
    accept_backoff, ActivityIo, ConnectionActivity, ConnectionGuard, ConnectionTracker, InFlight,
    Listener, ListenerError,
};

/// Errors from starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("the proxy server is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Client(#[from] ClientBuildError),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ForwardingEngine>,
}

/// The forward proxy server.
///
/// Owned by whoever starts it; `start` and `close` may be called repeatedly.
pub struct ProxyServer {
    config: ServerConfig,
    upstream_tls: Option<rustls::ClientConfig>,
    running: Option<RunningServer>,
}

struct RunningServer {
    local_addr: SocketAddr,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
    accept_loop: JoinHandle<()>,
}

impl ProxyServer {
    /// Create a stopped server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            upstream_tls: None,
            running: None,
        }
    }

    /// Verify HTTPS origins with `tls` instead of the webpki roots.
    pub fn with_upstream_tls(mut self, tls: rustls::ClientConfig) -> Self {
        self.upstream_tls = Some(tls);
        self
    }

    /// Bind the listening socket and start accepting connections.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let engine = match &self.upstream_tls {
            Some(tls) => ForwardingEngine::with_tls(self.config.timeout, tls.clone()),
            None => ForwardingEngine::new(self.config.timeout)?,
        };
        let router = build_router(AppState {
            engine: Arc::new(engine),
        });

        let listener = Listener::bind(self.config.bind_address, self.config.max_connections).await?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        let shutdown = Shutdown::new();
        let tracker = ConnectionTracker::new();
        let accept_loop = tokio::spawn(accept_loop(
            listener,
            router,
            tracker.clone(),
            shutdown.subscribe(),
            ConnectionTimeouts {
                socket: self.config.timeout,
                keep_alive: self.config.keep_alive_timeout,
            },
        ));

        tracing::info!(port = local_addr.port(), addr = %local_addr.ip(), "listen");

        self.running = Some(RunningServer {
            local_addr,
            shutdown,
            tracker,
            accept_loop,
        });
        Ok(local_addr)
    }

    /// Stop accepting and terminate all open connections.
    ///
    /// Returns `false` when the server was not running. Once this returns
    /// `true`, the socket is closed and every connection task has ended.
    pub async fn close(&mut self) -> bool {
        let Some(running) = self.running.take() else {
            return false;
        };

        running.shutdown.trigger();
        if let Err(e) = running.accept_loop.await {
            tracing::error!(error = %e, "Accept loop ended abnormally");
        }

        tracing::info!(address = %running.local_addr, "HTTP server stopped");
        true
    }

    /// Like [`close`](Self::close), running `on_closed` once everything has shut down.
    ///
    /// The callback is not invoked when the server was not running.
    pub async fn close_with<F: FnOnce()>(&mut self, on_closed: F) -> bool {
        let closed = self.close().await;
        if closed {
            on_closed();
        }
        closed
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address the server is listening on, if running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Number of open inbound connections.
    pub fn active_connections(&self) -> u64 {
        self.running.as_ref().map_or(0, |r| r.tracker.active_count())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Build the Axum router with all middleware layers.
///
/// Request and response bodies that stall between frames for longer than the
/// socket timeout fail, which ends the cycle and closes the connection.
pub fn build_router(state: AppState) -> Router {
    let body_timeout = state.engine.timeout();
    Router::new()
        .fallback(proxy_handler)
        .with_state(state)
        .layer(RequestBodyTimeoutLayer::new(body_timeout))
        .layer(ResponseBodyTimeoutLayer::new(body_timeout))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

/// A panic anywhere in the dispatch path still answers the caller.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown");
    tracing::error!(panic = detail, status = 503, "Unexpected failure while forwarding");
    error_response(503)
}

/// Collect the body, then forward.
///
/// A body that cannot be read abandons the cycle: nothing is sent back.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response<Body> {
    let target = request.uri().to_string();
    match InboundRequest::collect(request).await {
        Ok(inbound) => state.engine.forward(inbound).await,
        Err(e) => {
            tracing::warn!(url = %target, error = %e, "Dropping request");
            AbandonedCycle::response()
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ConnectionTimeouts {
    socket: Duration,
    keep_alive: Duration,
}

async fn accept_loop(
    listener: Listener,
    router: Router,
    tracker: ConnectionTracker,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
    timeouts: ConnectionTimeouts,
) {
    let mut connections = JoinSet::new();
    let mut accept_failures = 0u32;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr, permit)) => {
                    accept_failures = 0;
                    let guard = tracker.track();
                    let span = tracing::debug_span!(
                        "connection",
                        connection_id = %guard.id(),
                        peer_addr = %peer_addr,
                    );
                    let router = router.clone();
                    connections.spawn(
                        async move {
                            serve_connection(stream, router, timeouts, guard).await;
                            drop(permit);
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    accept_failures = accept_failures.saturating_add(1);
                    let delay = accept_backoff(accept_failures);
                    tracing::warn!(error = %e, retry_in = ?delay, "Accept error");
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    let open = connections.len();
    connections.shutdown().await;
    tracing::debug!(terminated = open, "Open connections terminated");
}

async fn serve_connection(
    stream: TcpStream,
    router: Router,
    timeouts: ConnectionTimeouts,
    _guard: ConnectionGuard,
) {
    let activity = ConnectionActivity::new();

    let requests = activity.clone();
    let service = service_fn(move |request: Request<Incoming>| {
        let router = router.clone();
        let in_flight = requests.begin_request();
        async move {
            let response = match router.oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            if response.extensions().get::<AbandonedCycle>().is_some() {
                return Err(AbandonedCycle);
            }
            Ok(response.map(|body| TrackedBody {
                inner: body,
                _in_flight: in_flight,
            }))
        }
    });

    let connection = http1::Builder::new()
        .keep_alive(true)
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.socket)
        .serve_connection(TokioIo::new(ActivityIo::new(stream, activity.clone())), service);

    tokio::select! {
        result = connection => {
            if let Err(e) = result {
                tracing::debug!(error = %e, "Connection ended with error");
            }
        }
        _ = activity.expired(timeouts.socket, timeouts.keep_alive) => {
            tracing::debug!(
                requests = activity.requests_served(),
                "Closing connection idle past its timeout"
            );
        }
    }
}

/// Response body that keeps its request in flight until the connection is done
/// with it, so the keep-alive clock starts only after the response.
struct TrackedBody {
    inner: Body,
    _in_flight: InFlight,
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
