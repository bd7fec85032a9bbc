//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Registry agent connection settings.
    pub registry: RegistryConfig,

    /// Where the control plane serves discovery to the proxy.
    pub control_plane: ControlPlaneConfig,

    /// Proxy binary and supervision settings.
    pub envoy: EnvoyConfig,

    /// How TLS material reaches the proxy.
    pub tls: TlsConfig,

    /// Directory for the rendered bootstrap and certificate files.
    /// A temporary directory is created when unset.
    pub config_dir: Option<PathBuf>,

    /// How long to wait for the first root CA and leaf certificate.
    pub startup_timeout_secs: u64,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            control_plane: ControlPlaneConfig::default(),
            envoy: EnvoyConfig::default(),
            tls: TlsConfig::default(),
            config_dir: None,
            startup_timeout_secs: 120,
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Registry agent connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Agent address as `host:port`.
    pub address: String,

    /// `http` or `https`.
    pub scheme: String,

    /// Datacenter to query; the agent's own when unset.
    pub datacenter: Option<String>,

    /// ACL token sent with every query when the proxy identity has none.
    pub token: Option<String>,

    /// HTTP basic auth as `user:password`.
    pub http_auth: Option<String>,

    /// Maximum time the agent may hold a blocking query, in seconds.
    pub wait_time_secs: u64,

    /// Delay before retrying a failed query, in milliseconds.
    pub retry_delay_ms: u64,

    /// Path where the agent serves connection authorization.
    pub authorize_path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8500".to_string(),
            scheme: "http".to_string(),
            datacenter: None,
            token: None,
            http_auth: None,
            wait_time_secs: 300,
            retry_delay_ms: 1000,
            authorize_path: "/v1/agent/connect/authorize".to_string(),
        }
    }
}

/// Control plane discovery endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Address the control plane serves discovery on (TCP mode).
    pub address: String,

    /// Port the control plane serves discovery on (TCP mode).
    pub port: u16,

    /// Use a unix domain socket instead of TCP.
    pub use_uds: bool,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8081,
            use_uds: false,
        }
    }
}

/// Proxy binary and supervision settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvoyConfig {
    /// Proxy binary; resolved through `PATH` when not absolute.
    pub binary: String,

    /// Admin interface bind address.
    pub admin_address: String,

    /// Admin interface port (0 picks a free port).
    pub admin_port: u16,

    /// How long a new instance must survive before it is accepted, in ms.
    pub stabilization_window_ms: u64,

    /// How long instances get to exit after SIGTERM before being killed.
    pub shutdown_grace_secs: u64,

    /// Pass the bootstrap inline (`--config-yaml`) rather than by path.
    pub inline_bootstrap: bool,

    /// Extra arguments appended to every launch.
    pub extra_args: Vec<String>,
}

impl Default for EnvoyConfig {
    fn default() -> Self {
        Self {
            binary: "envoy".to_string(),
            admin_address: "127.0.0.1".to_string(),
            admin_port: 0,
            stabilization_window_ms: 5000,
            shutdown_grace_secs: 10,
            inline_bootstrap: true,
            extra_args: Vec::new(),
        }
    }
}

/// Where the proxy reads its TLS material from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsSource {
    /// PEM files in the config dir, referenced from the bootstrap.
    Files,
    /// A named secret delivered by the control plane.
    Secret,
}

/// TLS material settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    pub source: TlsSource,

    /// Name of the secret holding the leaf certificate bundle.
    pub secret_name: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            source: TlsSource::Secret,
            secret_name: "connect-leaf-certificate".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9102".to_string(),
        }
    }
}
