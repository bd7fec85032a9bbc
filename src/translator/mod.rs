//! Configuration translation subsystem.
//!
//! # Data Flow
//! ```text
//! descriptor stream (ConnectProxyConfig)
//!     → ProxyDescriptor (typed decode)
//!     → writer.rs (get → clone → apply → compare)
//!     → role store (written only on change)
//!     → control plane watchers
//! ```
//!
//! # Design Decisions
//! - Listener identity is the listener name, not its position
//! - Upstreams are sorted by local bind port so equal inputs translate equally
//! - Every write triggers downstream reconfiguration, so no-op writes are skipped

pub mod writer;

pub use writer::{AuthorizeTarget, ConfigTranslator, SyncOutcome, TranslateError};
