//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::ProxyConfig;
use crate::config::validation::ValidationError;

/// Name of the configuration file looked up at startup.
pub const CONFIG_FILE: &str = "ospxy.json";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a configuration file. `.toml` files are read as TOML, anything else as JSON.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    if is_toml {
        Ok(toml::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(&content)?)
    }
}

/// Locations searched for the configuration file, in order.
pub fn search_paths(base: &Path) -> [PathBuf; 2] {
    [base.join("conf").join(CONFIG_FILE), base.join(CONFIG_FILE)]
}

/// Find and load the configuration under `base`.
///
/// A file that is missing or cannot be parsed is skipped. When no candidate
/// loads, the built-in default is returned.
pub fn discover_config(base: &Path) -> ProxyConfig {
    for path in search_paths(base) {
        if !path.exists() {
            continue;
        }
        match load_config(&path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Configuration loaded");
                return config;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable configuration file");
            }
        }
    }

    tracing::debug!("No configuration file found, using defaults");
    ProxyConfig::default()
}
