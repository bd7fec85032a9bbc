//! In-memory object storage shared with the control plane.
//!
//! # Data Flow
//! ```text
//! translator / certificate sink
//!     → memory.rs (Create / Update under the map's write lock)
//!     → buffered notification channel
//!     → Watcher tasks (List snapshot → handlers)
//! ```
//!
//! # Design Decisions
//! - The store is the only persistence boundary the bridge writes to
//! - Writers never wait on watchers; notifications are buffered and coalesced
//! - Objects are keyed by name; Create on an existing name is an error so
//!   callers can fall back to Update

pub mod memory;
pub mod secret;

use thiserror::Error;

pub use memory::{MemoryStore, WatchHandler, Watcher};
pub use secret::Secret;

/// An object that can be kept in a [`MemoryStore`].
pub trait StoreObject: Clone + PartialEq + Send + Sync + 'static {
    /// Unique name of the object within its store.
    fn name(&self) -> &str;
}

impl StoreObject for crate::model::Role {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Errors returned by store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} does not exist")]
    NotFound(String),
}

impl StoreError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
