//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! conf/ospxy.json or ./ospxy.json (or an explicit --config path)
//!     → loader.rs (parse & deserialize, default when absent)
//!     → validation.rs (semantic checks, all errors at once)
//!     → ServerConfig (validated, immutable)
//!     → handed to the server at construction
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup
//! - Every file field is optional; defaults resolve in schema.rs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{discover_config, load_config, ConfigError};
pub use schema::{PortValue, ProxyConfig, ServerConfig};
pub use validation::{validate_config, ValidationError};
