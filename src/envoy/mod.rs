//! Proxy process subsystem.
//!
//! # Data Flow
//! ```text
//! certificate bundle + node identity + xds address
//!     → bootstrap.rs (bootstrap document)
//!     → supervisor.rs (bootstrap.json, TLS files, --config-yaml/--config-path)
//!     → proxy child processes (--restart-epoch N)
//! ```
//!
//! # Design Decisions
//! - The restart epoch belongs to one supervisor value, never to the process
//! - A launch is only accepted after it survives the stabilization window
//! - Hot restart is left to the proxy: both generations overlap until the old
//!   one drains and exits

pub mod bootstrap;
pub mod supervisor;

pub use bootstrap::{NodeIdentity, XdsAddress};
pub use supervisor::{
    EnvoyError, EnvoySupervisor, SupervisorHandle, SupervisorSettings, SupervisorStatus,
};
