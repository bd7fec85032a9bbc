//! Long-poll ("blocking query") state machine.
//!
//! # Design Decisions
//! - One `BlockingQuery` per loop; it owns the wait index and retry delay
//! - The query itself is injected, so retry behavior is testable without a registry
//! - Errors never end the loop; only cancellation does

use std::future::Future;
use std::time::Duration;

use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::registry::client::RegistryError;
use crate::registry::types::{QueryMeta, QueryOptions};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct BlockingQuery {
    last_index: u64,
    retry_delay: Duration,
}

impl BlockingQuery {
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            last_index: 0,
            retry_delay,
        }
    }

    /// Index the next query will wait on.
    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    pub fn options(&self) -> QueryOptions {
        QueryOptions {
            wait_index: self.last_index,
        }
    }

    /// Record the index of a successful response.
    ///
    /// An index that goes backwards (agent restart, snapshot restore) resets
    /// the wait index so the next query returns immediately.
    pub fn observe(&mut self, meta: QueryMeta) {
        self.last_index = if meta.last_index < self.last_index {
            0
        } else {
            meta.last_index
        };
    }

    /// Run `query` until it succeeds or `shutdown` fires.
    ///
    /// Failures are logged and retried after the fixed retry delay. Returns
    /// `None` once shutdown has been requested; no query is started after that.
    pub async fn next<T, F, Fut>(
        &mut self,
        endpoint: &'static str,
        shutdown: &Shutdown,
        mut query: F,
    ) -> Option<(T, QueryMeta)>
    where
        F: FnMut(QueryOptions) -> Fut,
        Fut: Future<Output = Result<(T, QueryMeta), RegistryError>>,
    {
        loop {
            if shutdown.is_triggered() {
                return None;
            }

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                result = query(self.options()) => result,
            };

            match result {
                Ok((value, meta)) => {
                    self.observe(meta);
                    metrics::record_registry_update(endpoint);
                    tracing::debug!(endpoint, index = meta.last_index, "Registry query returned");
                    return Some((value, meta));
                }
                Err(e) => {
                    metrics::record_registry_error(endpoint);
                    tracing::warn!(
                        endpoint,
                        error = %e,
                        retry_in_ms = self.retry_delay.as_millis() as u64,
                        "Registry query failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return None,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
    }
}

impl Default for BlockingQuery {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY)
    }
}
