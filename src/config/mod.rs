//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (CONSUL_* environment overrides)
//!     → command-line flags (binary only)
//!     → validation.rs (semantic checks)
//!     → BridgeConfig (validated, immutable)
//!
//! environment (CONNECT_PROXY_ID / CONNECT_PROXY_TOKEN)
//!     → identity.rs → ProxyIdentity
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod identity;
pub mod loader;
pub mod schema;
pub mod validation;

pub use identity::{IdentityError, ProxyIdentity};
pub use loader::{load_config, ConfigError};
pub use schema::{
    BridgeConfig, ControlPlaneConfig, EnvoyConfig, ObservabilityConfig, RegistryConfig, TlsConfig,
    TlsSource,
};
