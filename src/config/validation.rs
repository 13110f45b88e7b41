//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Resolve the listen port and bind address into a `SocketAddr`
//! - Validate value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<ServerConfig, Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::{IpAddr, SocketAddr};

use crate::config::schema::{PortValue, ProxyConfig, ServerConfig};

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("server definition is invalid: httpPort is not set")]
    MissingPort,

    #[error("httpPort {0:?} is not a valid TCP port")]
    InvalidPort(String),

    #[error("httpBindAddr {0:?} is not an IP address")]
    InvalidBindAddr(String),

    #[error("maxConnections must be greater than zero")]
    ZeroMaxConnections,

    #[error("metricsAddress {0:?} is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Validate a loaded configuration and resolve it into server settings.
pub fn validate_config(config: &ProxyConfig) -> Result<ServerConfig, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let port = match resolve_port(config.http_port.as_ref()) {
        Ok(port) => Some(port),
        Err(e) => {
            errors.push(e);
            None
        }
    };

    let ip = match config.bind_addr().parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            errors.push(ValidationError::InvalidBindAddr(config.bind_addr().to_string()));
            None
        }
    };

    if config.max_connections == Some(0) {
        errors.push(ValidationError::ZeroMaxConnections);
    }

    if let Some(addr) = &config.metrics_address {
        if addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidMetricsAddress(addr.clone()));
        }
    }

    match (port, ip) {
        (Some(port), Some(ip)) if errors.is_empty() => Ok(ServerConfig {
            bind_address: SocketAddr::new(ip, port),
            max_connections: config.max_connections,
            keep_alive_timeout: config.keep_alive_timeout(),
            timeout: config.timeout(),
        }),
        _ => Err(errors),
    }
}

fn resolve_port(value: Option<&PortValue>) -> Result<u16, ValidationError> {
    match value {
        None => Err(ValidationError::MissingPort),
        Some(PortValue::Number(n)) => {
            u16::try_from(*n).map_err(|_| ValidationError::InvalidPort(n.to_string()))
        }
        Some(PortValue::Text(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(ValidationError::MissingPort);
            }
            trimmed
                .parse::<u16>()
                .map_err(|_| ValidationError::InvalidPort(text.clone()))
        }
    }
}
