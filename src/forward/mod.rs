//! Request forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! InboundRequest (body collected)
//!     → target.rs (http:// → https://, or prepend https://)
//!     → engine.rs (HTTPS attempt, HTTP fallback on transport failure, 503 on timeout)
//!     → client.rs (TLS-or-plain hyper client, no connection reuse)
//!     → http::response (relay or 503)
//! ```

pub mod client;
pub mod engine;
pub mod target;

pub use engine::{ForwardError, ForwardingEngine, Outcome};
pub use target::{UpstreamScheme, UpstreamTarget};
