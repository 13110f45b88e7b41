//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1.1 connection, Axum router)
//!     → request.rs (collect body, snapshot request)
//!     → forward::ForwardingEngine (HTTPS, then HTTP fallback)
//!     → response.rs (relay upstream response or 503)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{InboundRequest, OutboundRequest};
pub use server::{ProxyServer, ServerError};
