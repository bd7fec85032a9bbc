//! OS signal handling.
//!
//! SIGINT and SIGTERM both trigger the shared [`Shutdown`]. Shutdown is
//! cooperative: every blocking operation in the bridge observes the signal.

use tokio::signal::unix::{signal, SignalKind};

use crate::lifecycle::Shutdown;

/// Spawn a task that triggers `shutdown` on the first SIGINT or SIGTERM.
pub fn cancel_on_signal(shutdown: Shutdown) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => tracing::info!("SIGINT received, shutting down"),
            _ = terminate.recv() => tracing::info!("SIGTERM received, shutting down"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.trigger();
    }))
}
