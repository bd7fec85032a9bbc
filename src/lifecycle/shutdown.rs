//! Shutdown coordination for the bridge.

use std::sync::Arc;

use tokio::sync::watch;

/// Coordinator for graceful shutdown.
///
/// Cloning is cheap; every clone observes the same signal. The signal is
/// level-triggered, so a task that starts waiting after [`Shutdown::trigger`]
/// still returns immediately.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a new, untriggered shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trigger the shutdown signal. Repeated calls are no-ops.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until shutdown is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Shutdown {
    /// A signal that fires with `self` but can also be triggered on its own.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn child(&self) -> Shutdown {
        let child = Shutdown::new();
        let parent = self.clone();
        let forward = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => forward.trigger(),
                _ = forward.cancelled() => {}
            }
        });
        child
    }

    /// Trigger this signal when the returned guard is dropped.
    pub fn drop_guard(&self) -> ShutdownGuard {
        ShutdownGuard {
            shutdown: self.clone(),
        }
    }
}

/// Triggers its [`Shutdown`] on drop.
#[must_use = "the signal fires as soon as the guard is dropped"]
pub struct ShutdownGuard {
    shutdown: Shutdown,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}
