//! Connect sidecar bridge library

pub mod config;
pub mod envoy;
pub mod lifecycle;
pub mod model;
pub mod observability;
pub mod registry;
pub mod runner;
pub mod store;
pub mod translator;

pub use config::BridgeConfig;
pub use lifecycle::Shutdown;
pub use runner::{BridgeError, Runner};
