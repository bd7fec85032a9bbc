//! Configuration loading from disk and the environment.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::BridgeConfig;
use crate::config::validation::{validate_config, ValidationError};

const CONSUL_HTTP_ADDR: &str = "CONSUL_HTTP_ADDR";
const CONSUL_HTTP_SSL: &str = "CONSUL_HTTP_SSL";
const CONSUL_HTTP_TOKEN: &str = "CONSUL_HTTP_TOKEN";
const CONSUL_HTTP_AUTH: &str = "CONSUL_HTTP_AUTH";
const CONSUL_DATACENTER: &str = "CONSUL_DATACENTER";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid env var {name}={value:?}")]
    EnvVar { name: &'static str, value: String },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, override from the process environment, and validate.
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    let mut config = read_config(path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate(config)
}

/// Parse a TOML file, or return defaults when no path is given.
pub fn read_config(path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(BridgeConfig::default());
    };
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply the registry's conventional environment variables.
pub fn apply_env_overrides<F>(config: &mut BridgeConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = lookup(CONSUL_HTTP_ADDR).filter(|v| !v.is_empty()) {
        if let Some(rest) = addr.strip_prefix("https://") {
            config.registry.scheme = "https".to_string();
            config.registry.address = rest.trim_end_matches('/').to_string();
        } else if let Some(rest) = addr.strip_prefix("http://") {
            config.registry.scheme = "http".to_string();
            config.registry.address = rest.trim_end_matches('/').to_string();
        } else if addr.contains("://") {
            return Err(ConfigError::EnvVar {
                name: CONSUL_HTTP_ADDR,
                value: addr,
            });
        } else {
            config.registry.address = addr;
        }
    }

    if let Some(ssl) = lookup(CONSUL_HTTP_SSL).filter(|v| !v.is_empty()) {
        match ssl.to_ascii_lowercase().as_str() {
            "1" | "true" => config.registry.scheme = "https".to_string(),
            "0" | "false" => config.registry.scheme = "http".to_string(),
            _ => {
                return Err(ConfigError::EnvVar {
                    name: CONSUL_HTTP_SSL,
                    value: ssl,
                })
            }
        }
    }

    if let Some(token) = lookup(CONSUL_HTTP_TOKEN).filter(|v| !v.is_empty()) {
        config.registry.token = Some(token);
    }

    if let Some(auth) = lookup(CONSUL_HTTP_AUTH).filter(|v| !v.is_empty()) {
        if !auth.contains(':') {
            return Err(ConfigError::EnvVar {
                name: CONSUL_HTTP_AUTH,
                value: "<redacted>".to_string(),
            });
        }
        config.registry.http_auth = Some(auth);
    }

    if let Some(dc) = lookup(CONSUL_DATACENTER).filter(|v| !v.is_empty()) {
        config.registry.datacenter = Some(dc);
    }

    Ok(())
}

/// Run semantic validation, returning the config on success.
pub fn validate(config: BridgeConfig) -> Result<BridgeConfig, ConfigError> {
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}
