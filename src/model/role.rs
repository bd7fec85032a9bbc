//! Routing model ("role") consumed by the control plane.
//!
//! A role holds exactly one inbound listener, always first, followed by one
//! outbound listener per upstream ordered by local bind port.

use serde::Serialize;

/// Which direction a listener carries traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerKind {
    Inbound,
    Outbound,
}

/// Where the inbound listener asks the registry to authorize connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthConfig {
    pub target: String,
    pub authorize_hostname: String,
    pub authorize_port: u16,
    pub authorize_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InboundListenerConfig {
    pub local_service_name: String,
    pub local_service_address: String,
    pub auth_config: AuthConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboundListenerConfig {
    pub destination_service: String,
    pub destination_type: String,
}

/// Listener-specific configuration, tagged by direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListenerConfig {
    Inbound(InboundListenerConfig),
    Outbound(OutboundListenerConfig),
}

impl ListenerConfig {
    pub fn kind(&self) -> ListenerKind {
        match self {
            ListenerConfig::Inbound(_) => ListenerKind::Inbound,
            ListenerConfig::Outbound(_) => ListenerKind::Outbound,
        }
    }
}

/// A single listener of the local proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listener {
    /// Stable identifier (`<proxy-service-id>-inbound` or `<destination>-outbound`).
    pub name: String,
    pub bind_address: String,
    pub bind_port: u16,
    pub config: ListenerConfig,
    /// Name of the secret holding the listener's TLS material, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_secret_ref: Option<String>,
}

impl Listener {
    pub fn kind(&self) -> ListenerKind {
        self.config.kind()
    }

    pub fn inbound(&self) -> Option<&InboundListenerConfig> {
        match &self.config {
            ListenerConfig::Inbound(cfg) => Some(cfg),
            ListenerConfig::Outbound(_) => None,
        }
    }

    pub fn outbound(&self) -> Option<&OutboundListenerConfig> {
        match &self.config {
            ListenerConfig::Outbound(cfg) => Some(cfg),
            ListenerConfig::Inbound(_) => None,
        }
    }
}

/// The routing model for one proxy instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Role {
    pub name: String,
    pub listeners: Vec<Listener>,
}

impl Role {
    /// Create an empty role.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listeners: Vec::new(),
        }
    }

    /// The inbound listener, if the role has been translated at least once.
    pub fn inbound_listener(&self) -> Option<&Listener> {
        self.listeners.first().filter(|l| l.kind() == ListenerKind::Inbound)
    }

    /// Outbound listeners in their stored order.
    pub fn outbound_listeners(&self) -> impl Iterator<Item = &Listener> {
        self.listeners
            .iter()
            .filter(|l| l.kind() == ListenerKind::Outbound)
    }
}
