//! TCP listener with per-connection socket tuning.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Apply socket options to every accepted stream
//! - Optionally enforce a connection cap via semaphore

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),
    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(std::io::Error),
}

/// A TCP listener that tunes each accepted socket.
///
/// Without a connection cap every connection is accepted immediately. With a
/// cap, `accept` waits for a free slot before taking the next connection.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Option<Arc<Semaphore>>,
}

impl Listener {
    /// Bind to `addr`, optionally limiting concurrent connections.
    pub async fn bind(addr: SocketAddr, max_connections: Option<usize>) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = ?max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: max_connections.map(|n| Arc::new(Semaphore::new(n))),
        })
    }

    /// Accept a new connection, respecting the connection limit if any.
    ///
    /// Returns the tuned stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = match &self.connection_limit {
            // The semaphore is never closed while the listener lives.
            Some(limit) => limit.clone().acquire_owned().await.ok(),
            None => None,
        };

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        tune_socket(&stream, addr);

        tracing::debug!(peer_addr = %addr, "Connection accepted");

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Free connection slots, or `None` when unbounded.
    pub fn available_permits(&self) -> Option<usize> {
        self.connection_limit.as_ref().map(|s| s.available_permits())
    }
}

/// Disable write coalescing and TCP keep-alive probing.
///
/// Failures are logged; the connection is still served.
fn tune_socket(stream: &TcpStream, peer_addr: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!(peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
    }
    if let Err(e) = socket2::SockRef::from(stream).set_keepalive(false) {
        tracing::warn!(peer_addr = %peer_addr, error = %e, "Failed to disable SO_KEEPALIVE");
    }
}

/// A connection slot. Releases the slot when dropped.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: Option<OwnedSemaphorePermit>,
}
