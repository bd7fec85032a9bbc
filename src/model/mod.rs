//! Data model shared by the bridge subsystems.
//!
//! # Data Flow
//! ```text
//! registry responses
//!     → certs.rs (root CA sets, leaf certificate + key, bundles)
//!     → descriptor.rs (opaque proxy config map → typed ProxyDescriptor)
//!     → role.rs (ProxyDescriptor → Role with inbound/outbound listeners)
//! ```
//!
//! # Design Decisions
//! - Every type compares by value; equality drives dedup and write suppression
//! - Decoding is explicit and field-by-field; missing required fields are errors
//! - The routing model is a tagged listener list keyed by listener name

pub mod certs;
pub mod descriptor;
pub mod role;

pub use certs::{CertificateAndKey, CertificateBundle, CertificateSet};
pub use descriptor::{DescriptorError, ProxyDescriptor, Upstream};
pub use role::{
    AuthConfig, InboundListenerConfig, Listener, ListenerConfig, ListenerKind,
    OutboundListenerConfig, Role,
};
