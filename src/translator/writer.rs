//! Role writer: descriptor in, at most one store write out.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use crate::config::RegistryConfig;
use crate::lifecycle::Shutdown;
use crate::model::{
    DescriptorError, InboundListenerConfig, Listener, ListenerConfig, ListenerKind,
    OutboundListenerConfig, ProxyDescriptor, Role, Upstream,
};
use crate::observability::metrics;
use crate::registry::ConnectProxyConfig;
use crate::store::{MemoryStore, StoreError};

/// Outbound listeners only accept local connections.
const OUTBOUND_BIND_ADDRESS: &str = "127.0.0.1";

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("decoding proxy config for role {role}: {source}")]
    Decode {
        role: String,
        #[source]
        source: DescriptorError,
    },

    #[error("updating role {role}: {source}")]
    Store {
        role: String,
        #[source]
        source: StoreError,
    },

    #[error("invalid registry address '{address}' for authorization: {reason}")]
    AuthorizeAddress { address: String, reason: String },
}

/// What a [`ConfigTranslator::sync`] call did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Where inbound listeners send authorization requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeTarget {
    pub hostname: String,
    pub port: u16,
    pub path: String,
}

impl AuthorizeTarget {
    /// Derive the target from the registry agent's address.
    pub fn from_registry(config: &RegistryConfig) -> Result<Self, TranslateError> {
        let invalid = |reason: &str| TranslateError::AuthorizeAddress {
            address: config.address.clone(),
            reason: reason.to_string(),
        };
        let url = Url::parse(&format!("{}://{}", config.scheme, config.address))
            .map_err(|e| invalid(&e.to_string()))?;
        let hostname = url.host_str().ok_or_else(|| invalid("no host"))?.to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("no port"))?;

        Ok(Self {
            hostname,
            port,
            path: config.authorize_path.clone(),
        })
    }
}

/// Keeps one role in the store in sync with the proxy descriptor.
pub struct ConfigTranslator {
    role_name: String,
    roles: MemoryStore<Role>,
    authorize: AuthorizeTarget,
    tls_secret_ref: Option<String>,
    latest: Arc<ArcSwapOption<ProxyDescriptor>>,
}

impl ConfigTranslator {
    pub fn new(role_name: impl Into<String>, roles: MemoryStore<Role>, authorize: AuthorizeTarget) -> Self {
        Self {
            role_name: role_name.into(),
            roles,
            authorize,
            tls_secret_ref: None,
            latest: Arc::new(ArcSwapOption::empty()),
        }
    }

    /// Reference the given secret from the inbound listener.
    pub fn with_tls_secret_ref(mut self, secret: Option<String>) -> Self {
        self.tls_secret_ref = secret;
        self
    }

    pub fn role_name(&self) -> &str {
        &self.role_name
    }

    /// Shared handle to the most recently decoded descriptor.
    pub fn latest_descriptor(&self) -> Arc<ArcSwapOption<ProxyDescriptor>> {
        self.latest.clone()
    }

    /// Bring the stored role in line with `config`.
    ///
    /// Decode failures leave the store untouched. The store is written only
    /// when the translated role differs from what it already holds.
    pub fn sync(&self, config: &ConnectProxyConfig) -> Result<SyncOutcome, TranslateError> {
        let descriptor =
            ProxyDescriptor::from_connect_config(config).map_err(|source| TranslateError::Decode {
                role: self.role_name.clone(),
                source,
            })?;
        self.latest.store(Some(Arc::new(descriptor.clone())));

        match self.roles.get(&self.role_name) {
            Ok(current) => self.update_existing(current, &descriptor),
            Err(e) if e.is_not_found() => {
                let mut role = Role::new(self.role_name.clone());
                self.apply(&mut role, &descriptor);
                match self.roles.create(role) {
                    Ok(role) => {
                        metrics::record_role_write();
                        tracing::info!(
                            role = %self.role_name,
                            listeners = role.listeners.len(),
                            "Role created"
                        );
                        Ok(SyncOutcome::Created)
                    }
                    // Someone else created it first; reconcile against theirs.
                    Err(e) if e.is_already_exists() => {
                        let current = self.roles.get(&self.role_name).map_err(|e| self.store_error(e))?;
                        self.update_existing(current, &descriptor)
                    }
                    Err(e) => Err(self.store_error(e)),
                }
            }
            Err(e) => Err(self.store_error(e)),
        }
    }

    /// Apply every descriptor from `descriptors` until the stream ends or
    /// shutdown fires. Failed cycles are logged; the next update is tried
    /// independently.
    pub async fn run(self, mut descriptors: mpsc::Receiver<ConnectProxyConfig>, shutdown: Shutdown) {
        loop {
            let config = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = descriptors.recv() => match next {
                    Some(config) => config,
                    None => break,
                },
            };
            if let Err(e) = self.sync(&config) {
                tracing::error!(role = %self.role_name, error = %e, "Failed to sync role");
            }
        }
        tracing::debug!(role = %self.role_name, "Translator stopped");
    }

    fn update_existing(&self, current: Role, descriptor: &ProxyDescriptor) -> Result<SyncOutcome, TranslateError> {
        let mut desired = current.clone();
        self.apply(&mut desired, descriptor);
        if desired == current {
            tracing::debug!(role = %self.role_name, "Role unchanged, skipping write");
            return Ok(SyncOutcome::Unchanged);
        }

        let listeners = desired.listeners.len();
        self.roles.update(desired).map_err(|e| self.store_error(e))?;
        metrics::record_role_write();
        tracing::info!(role = %self.role_name, listeners, "Role updated");
        Ok(SyncOutcome::Updated)
    }

    /// Rebuild `role.listeners` from `descriptor`, reusing existing listener
    /// values matched by kind (inbound) or name (outbound). Outbound
    /// listeners whose upstream is gone are dropped.
    fn apply(&self, role: &mut Role, descriptor: &ProxyDescriptor) {
        let mut previous = std::mem::take(&mut role.listeners);

        let mut inbound = take_listener(&mut previous, |l| l.kind() == ListenerKind::Inbound)
            .unwrap_or_else(|| blank_listener(ListenerConfig::Inbound(InboundListenerConfig::default())));
        self.sync_inbound(&mut inbound, descriptor);
        role.listeners.push(inbound);

        for upstream in descriptor.sorted_upstreams() {
            let name = outbound_name(&upstream);
            let mut outbound = take_listener(&mut previous, |l| {
                l.kind() == ListenerKind::Outbound && l.name == name
            })
            .unwrap_or_else(|| blank_listener(ListenerConfig::Outbound(OutboundListenerConfig::default())));
            sync_outbound(&mut outbound, &upstream);
            role.listeners.push(outbound);
        }
    }

    fn sync_inbound(&self, listener: &mut Listener, descriptor: &ProxyDescriptor) {
        listener.name = format!("{}-inbound", descriptor.proxy_service_id);
        listener.bind_address = descriptor.bind_address.clone();
        listener.bind_port = descriptor.bind_port;
        listener.tls_secret_ref = self.tls_secret_ref.clone();

        if let ListenerConfig::Inbound(inbound) = &mut listener.config {
            inbound.local_service_name = descriptor.target_service_name.clone();
            inbound.local_service_address = descriptor.local_service_address.clone();

            let auth = &mut inbound.auth_config;
            auth.target = descriptor.target_service_name.clone();
            auth.authorize_hostname = self.authorize.hostname.clone();
            auth.authorize_port = self.authorize.port;
            auth.authorize_path = self.authorize.path.clone();
        }
    }

    fn store_error(&self, source: StoreError) -> TranslateError {
        TranslateError::Store {
            role: self.role_name.clone(),
            source,
        }
    }
}

fn outbound_name(upstream: &Upstream) -> String {
    format!("{}-outbound", upstream.destination_name)
}

fn sync_outbound(listener: &mut Listener, upstream: &Upstream) {
    listener.name = outbound_name(upstream);
    listener.bind_address = OUTBOUND_BIND_ADDRESS.to_string();
    listener.bind_port = upstream.local_bind_port;
    listener.tls_secret_ref = None;

    if let ListenerConfig::Outbound(outbound) = &mut listener.config {
        outbound.destination_service = upstream.destination_name.clone();
        outbound.destination_type = upstream.destination_type.clone();
    }
}

fn take_listener<P>(listeners: &mut Vec<Listener>, predicate: P) -> Option<Listener>
where
    P: Fn(&Listener) -> bool,
{
    listeners
        .iter()
        .position(|l| predicate(l))
        .map(|i| listeners.remove(i))
}

fn blank_listener(config: ListenerConfig) -> Listener {
    Listener {
        name: String::new(),
        bind_address: String::new(),
        bind_port: 0,
        config,
        tls_secret_ref: None,
    }
}
