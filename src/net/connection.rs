//! Per-connection bookkeeping.
//!
//! # Responsibilities
//! - Name each connection for log correlation
//! - Count open connections and publish the gauge
//! - Track request and read activity so a connection waiting too long for its
//!   next request can be closed

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::Notify;

use crate::observability::metrics;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Process-wide connection number, shown as `conn-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Shared count of open inbound connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    open: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a newly accepted connection until the returned guard drops.
    pub fn track(&self) -> ConnectionGuard {
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_connections(open);
        ConnectionGuard {
            open: Arc::clone(&self.open),
            id: ConnectionId::next(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.open.load(Ordering::SeqCst)
    }
}

/// Held by the connection task; aborting the task still releases it.
#[derive(Debug)]
pub struct ConnectionGuard {
    open: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let open = self.open.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_connections(open);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// What one inbound connection is doing.
///
/// With a request in flight the connection is busy and never times out here.
/// Otherwise it waits for the next request: before the first one, or once the
/// caller has started sending the next head, that wait is bounded by the socket
/// timeout; a connection with nothing to read after a response is bounded by
/// the keep-alive timeout.
#[derive(Debug, Default)]
pub struct ConnectionActivity {
    in_flight: AtomicUsize,
    served: AtomicU64,
    reading: AtomicBool,
    epoch: AtomicU64,
    changed: Notify,
}

impl ConnectionActivity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark a request as started. It counts as in flight until the guard drops.
    pub fn begin_request(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.reading.store(false, Ordering::SeqCst);
        self.bump();
        InFlight {
            activity: Arc::clone(self),
        }
    }

    pub fn requests_served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    /// Bytes arriving between requests belong to the next request head.
    fn record_read(&self) {
        if self.in_flight.load(Ordering::SeqCst) == 0 {
            self.reading.store(true, Ordering::SeqCst);
        }
        self.bump();
    }

    fn bump(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    fn wait_limit(&self, socket_timeout: Duration, keep_alive: Duration) -> Option<Duration> {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            None
        } else if self.requests_served() == 0 || self.reading.load(Ordering::SeqCst) {
            Some(socket_timeout)
        } else {
            Some(keep_alive)
        }
    }

    /// Resolve once the connection has waited too long for its next request.
    pub async fn expired(&self, socket_timeout: Duration, keep_alive: Duration) {
        loop {
            let changed = self.changed.notified();
            let Some(limit) = self.wait_limit(socket_timeout, keep_alive) else {
                changed.await;
                continue;
            };

            let epoch = self.epoch.load(Ordering::SeqCst);
            tokio::select! {
                _ = tokio::time::sleep(limit) => {
                    if self.epoch.load(Ordering::SeqCst) == epoch {
                        return;
                    }
                }
                _ = changed => {}
            }
        }
    }
}

/// One request in flight; dropping it completes the request.
#[derive(Debug)]
pub struct InFlight {
    activity: Arc<ConnectionActivity>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.activity.served.fetch_add(1, Ordering::SeqCst);
        self.activity.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.activity.bump();
    }
}

/// A stream that reports every successful read to its [`ConnectionActivity`].
#[derive(Debug)]
pub struct ActivityIo<S> {
    inner: S,
    activity: Arc<ConnectionActivity>,
}

impl<S> ActivityIo<S> {
    pub fn new(inner: S, activity: Arc<ConnectionActivity>) -> Self {
        Self { inner, activity }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ActivityIo<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            self.activity.record_read();
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ActivityIo<S> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
