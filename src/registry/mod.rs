//! Registry subsystem.
//!
//! # Responsibilities
//! - Talk to the local registry agent's connect API
//! - Turn its blocking queries into continuous update streams
//!
//! # Data Flow
//! ```text
//! registry agent (HTTP, long-poll)
//!     → client.rs (HttpConnectClient: one request per query)
//!     → query.rs (BlockingQuery: wait index, fixed retry delay)
//!     → fetcher.rs (three loops → mpsc streams)
//!     → runner (certificates) / translator (descriptors)
//! ```

pub mod client;
pub mod fetcher;
pub mod query;
pub mod types;

pub use client::{ConnectClient, HttpConnectClient, RegistryError};
pub use fetcher::{CertificateFetcher, FetcherStreams};
pub use query::BlockingQuery;
pub use types::{ConnectProxyConfig, LeafCert, QueryMeta, QueryOptions, RootsInfo};
