//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Check addresses parse before anything binds or connects
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::config::schema::BridgeConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let registry = &config.registry;
    if registry.address.trim().is_empty() {
        errors.push(ValidationError::new("registry.address", "must not be empty"));
    }
    if registry.scheme != "http" && registry.scheme != "https" {
        errors.push(ValidationError::new(
            "registry.scheme",
            format!("expected http or https, got {:?}", registry.scheme),
        ));
    }
    if registry.wait_time_secs == 0 {
        errors.push(ValidationError::new("registry.wait_time_secs", "must be greater than 0"));
    }
    if registry.retry_delay_ms == 0 {
        errors.push(ValidationError::new("registry.retry_delay_ms", "must be greater than 0"));
    }
    if !registry.authorize_path.starts_with('/') {
        errors.push(ValidationError::new("registry.authorize_path", "must start with '/'"));
    }
    if let Some(auth) = &registry.http_auth {
        if !auth.contains(':') {
            errors.push(ValidationError::new("registry.http_auth", "expected user:password"));
        }
    }

    let control_plane = &config.control_plane;
    if !control_plane.use_uds {
        if control_plane.address.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::new(
                "control_plane.address",
                format!("not an IP address: {:?}", control_plane.address),
            ));
        }
        if control_plane.port == 0 {
            errors.push(ValidationError::new("control_plane.port", "must be greater than 0"));
        }
    }

    let envoy = &config.envoy;
    if envoy.binary.trim().is_empty() {
        errors.push(ValidationError::new("envoy.binary", "must not be empty"));
    }
    if envoy.admin_address.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::new(
            "envoy.admin_address",
            format!("not an IP address: {:?}", envoy.admin_address),
        ));
    }
    if envoy.stabilization_window_ms == 0 {
        errors.push(ValidationError::new(
            "envoy.stabilization_window_ms",
            "must be greater than 0",
        ));
    }

    if config.tls.secret_name.trim().is_empty() {
        errors.push(ValidationError::new("tls.secret_name", "must not be empty"));
    }
    if config.startup_timeout_secs == 0 {
        errors.push(ValidationError::new("startup_timeout_secs", "must be greater than 0"));
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {:?}", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
