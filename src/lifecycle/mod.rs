//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → registry query loops stop
//!             → runner leaves its select loop
//!             → supervisor sends SIGTERM to every proxy instance
//! ```
//!
//! # Design Decisions
//! - One cancellation signal for the whole process; the runner derives a child
//!   that also fires when it returns, so nothing it spawned outlives it
//! - Level-triggered: waiting after the trigger returns at once
//! - Proxy instances get a grace period before being killed

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownGuard};
