//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Start the metrics exporter when configured
//! - Start the server and run it until a shutdown signal
//!
//! # Design Decisions
//! - Fail fast: an invalid configuration is the only fatal startup condition
//! - The listener starts last (traffic only when ready)

use std::path::{Path, PathBuf};

use crate::config::{discover_config, load_config, validate_config, ConfigError, PortValue, ProxyConfig, ServerConfig};
use crate::http::server::{ProxyServer, ServerError};
use crate::lifecycle::signals::shutdown_signal;
use crate::observability::metrics;

/// Errors that prevent the proxy from serving.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Where configuration comes from and what overrides apply.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    /// Explicit configuration file. When set, it must load.
    pub config_path: Option<PathBuf>,
    /// Directory searched for `conf/ospxy.json` and `ospxy.json`.
    pub base_dir: PathBuf,
    pub port: Option<u16>,
    pub bind: Option<String>,
}

/// Load, override and validate the configuration.
pub fn resolve_config(options: &StartupOptions) -> Result<(ProxyConfig, ServerConfig), ConfigError> {
    let mut config = match &options.config_path {
        Some(path) => load_config(path)?,
        None => discover_config(base_dir(&options.base_dir)),
    };

    if let Some(port) = options.port {
        config.http_port = Some(PortValue::Number(i64::from(port)));
    }
    if let Some(bind) = &options.bind {
        config.http_bind_addr = Some(bind.clone());
    }

    match validate_config(&config) {
        Ok(server) => Ok((config, server)),
        Err(errors) => {
            let rendered = serde_json::to_string_pretty(&config).unwrap_or_default();
            tracing::error!(config = %rendered, "Server definition is invalid");
            Err(ConfigError::Validation(errors))
        }
    }
}

fn base_dir(dir: &Path) -> &Path {
    if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    }
}

/// Run the proxy until SIGINT/SIGTERM.
pub async fn run(options: StartupOptions) -> Result<(), StartupError> {
    let (config, server_config) = resolve_config(&options)?;

    tracing::info!(
        bind_address = %server_config.bind_address,
        timeout_ms = server_config.timeout.as_millis() as u64,
        keep_alive_timeout_ms = server_config.keep_alive_timeout.as_millis() as u64,
        max_connections = ?server_config.max_connections,
        "Configuration loaded"
    );

    // Validation guarantees the address parses.
    if let Some(addr) = config.metrics_address.as_deref().and_then(|a| a.parse().ok()) {
        metrics::init_metrics(addr);
    }

    let mut server = ProxyServer::new(server_config);
    server.start().await?;

    shutdown_signal().await;
    server.close().await;
    Ok(())
}
