//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, TCP_NODELAY on, SO_KEEPALIVE off)
//!     → connection.rs (id, open-connection count, keep-alive idle tracking)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Unbounded by default; an optional cap applies backpressure at accept
//! - Socket option failures never stop the listener
//! - Accept errors back off exponentially instead of spinning

pub mod backoff;
pub mod connection;
pub mod listener;

pub use backoff::accept_backoff;
pub use connection::{
    ActivityIo, ConnectionActivity, ConnectionGuard, ConnectionId, ConnectionTracker, InFlight,
};
pub use listener::{ConnectionPermit, Listener, ListenerError};
