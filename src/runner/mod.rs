//! Reconciliation runner.
//!
//! # Data Flow
//! ```text
//! CertificateFetcher
//!     ├─ descriptors ───────────────→ ConfigTranslator → role store
//!     ├─ root CAs ─┐
//!     └─ leaf ─────┴→ CertificateSink → secret store
//!                   └→ SupervisorHandle: write_config + reload → proxy
//! ```
//!
//! # Startup Sequence
//! 1. Prepare the config dir (temporary when none is configured)
//! 2. Start the fetcher and the translator
//! 3. Wait for the first root CA set and leaf certificate
//! 4. Publish them, render the bootstrap, launch the proxy
//! 5. Rewrite and reload on every later certificate change
//!
//! # Design Decisions
//! - Descriptors and certificates travel separately and never wait on each other
//! - Failures before the first successful launch end the bridge; later ones are logged
//! - When the last proxy instance exits the bridge exits too, so the
//!   surrounding orchestrator can restart it

pub mod certs;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::config::{BridgeConfig, ConfigError, IdentityError, ProxyIdentity};
use crate::envoy::{
    EnvoyError, EnvoySupervisor, NodeIdentity, SupervisorHandle, SupervisorSettings,
    SupervisorStatus, XdsAddress,
};
use crate::lifecycle::Shutdown;
use crate::model::{CertificateAndKey, CertificateBundle, CertificateSet, Role};
use crate::registry::{CertificateFetcher, ConnectClient, HttpConnectClient, RegistryError};
use crate::store::{MemoryStore, Secret, StoreError, WatchHandler};
use crate::translator::{AuthorizeTarget, ConfigTranslator, TranslateError};

pub use certs::CertificateSink;

const FALLBACK_NODE_NAME: &str = "generic-node";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error("proxy: {0}")]
    Envoy(#[from] EnvoyError),

    #[error("storing certificates: {0}")]
    Store(#[from] StoreError),

    #[error("preparing config dir {path}: {source}")]
    ConfigDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates received from the registry within {0:?}")]
    StartupTimeout(Duration),

    #[error("certificate streams closed before startup completed")]
    FetcherStopped,

    #[error("all proxy instances have exited")]
    ProxyExited,

    #[error("installing signal handlers: {0}")]
    Signals(#[source] std::io::Error),
}

/// Directory holding the bootstrap and certificate files.
///
/// Removed on drop when the runner created it.
struct ConfigDir {
    path: PathBuf,
    owned: bool,
}

impl ConfigDir {
    async fn prepare(configured: Option<&Path>) -> Result<Self, BridgeError> {
        let (path, owned) = match configured {
            Some(path) => (path.to_path_buf(), false),
            None => {
                let suffix: u64 = rand::thread_rng().gen();
                (std::env::temp_dir().join(format!("connect-bridge-{suffix:016x}")), true)
            }
        };
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| BridgeError::ConfigDir {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, owned })
    }
}

impl Drop for ConfigDir {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove config dir");
            }
        }
    }
}

/// Wires fetcher, translator, certificate sink and supervisor together.
pub struct Runner {
    config: BridgeConfig,
    identity: ProxyIdentity,
    client: Arc<dyn ConnectClient>,
    xds: XdsAddress,
    roles: MemoryStore<Role>,
    secrets: MemoryStore<Secret>,
    status: watch::Sender<Option<SupervisorStatus>>,
}

impl Runner {
    pub fn new(config: BridgeConfig, identity: ProxyIdentity, client: Arc<dyn ConnectClient>) -> Self {
        let xds = if config.control_plane.use_uds {
            XdsAddress::random_unix()
        } else {
            XdsAddress::tcp(config.control_plane.address.clone(), config.control_plane.port)
        };
        let (status, _) = watch::channel(None);
        Self {
            config,
            identity,
            client,
            xds,
            roles: MemoryStore::new(),
            secrets: MemoryStore::new(),
            status,
        }
    }

    /// Build a runner talking to the registry agent over HTTP.
    pub fn from_config(config: BridgeConfig, identity: ProxyIdentity) -> Result<Self, BridgeError> {
        let client = HttpConnectClient::new(&config.registry, identity.auth_token())?;
        Ok(Self::new(config, identity, Arc::new(client)))
    }

    /// Address the control plane should serve discovery on.
    pub fn xds_address(&self) -> &XdsAddress {
        &self.xds
    }

    /// Role store shared with the control plane.
    pub fn roles(&self) -> MemoryStore<Role> {
        self.roles.clone()
    }

    /// Secret store shared with the control plane.
    pub fn secrets(&self) -> MemoryStore<Secret> {
        self.secrets.clone()
    }

    /// Supervisor status after every successful launch.
    pub fn subscribe(&self) -> watch::Receiver<Option<SupervisorStatus>> {
        self.status.subscribe()
    }

    /// Run until shutdown, a startup failure, or the last proxy exits.
    ///
    /// Every task spawned here stops when `run` returns, whatever the reason.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), BridgeError> {
        let shutdown = shutdown.child();
        let _stop_tasks = shutdown.drop_guard();
        let config_dir = ConfigDir::prepare(self.config.config_dir.as_deref()).await?;
        let role_name = self.identity.proxy_id().to_string();
        let authorize = AuthorizeTarget::from_registry(&self.config.registry)?;

        tracing::info!(
            proxy_id = %role_name,
            xds = %self.xds,
            config_dir = %config_dir.path.display(),
            "Bridge starting"
        );

        let log_roles: Box<dyn WatchHandler<Role>> = Box::new(|roles: &[Role]| {
            tracing::debug!(roles = roles.len(), "Role store changed");
        });
        tokio::spawn(self.roles.watch(vec![log_roles]).run(shutdown.clone()));

        let mut streams = CertificateFetcher::new(self.client.clone(), &self.identity)
            .with_retry_delay(Duration::from_millis(self.config.registry.retry_delay_ms))
            .start(&shutdown);

        let translator = ConfigTranslator::new(role_name.clone(), self.roles.clone(), authorize)
            .with_tls_secret_ref(Some(self.config.tls.secret_name.clone()));
        let latest_descriptor = translator.latest_descriptor();
        tokio::spawn(translator.run(streams.descriptors, shutdown.clone()));

        let startup_timeout = Duration::from_secs(self.config.startup_timeout_secs);
        let first = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            first = tokio::time::timeout(
                startup_timeout,
                first_certificates(&mut streams.root_certificates, &mut streams.leaf_certificates),
            ) => first,
        };
        let (mut roots, mut leaf) = match first {
            Ok(Some(pair)) => pair,
            Ok(None) if shutdown.is_triggered() => return Ok(()),
            Ok(None) => return Err(BridgeError::FetcherStopped),
            Err(_) => return Err(BridgeError::StartupTimeout(startup_timeout)),
        };

        let sink = CertificateSink::new(self.secrets.clone(), self.config.tls.secret_name.clone());
        let bundle = CertificateBundle::new(roots.clone(), leaf.clone());
        sink.publish(&bundle)?;

        let node_name = resolve_node_name(self.client.as_ref()).await;
        let supervisor = EnvoySupervisor::new(
            SupervisorSettings::from_config(&self.config, config_dir.path.clone()),
            NodeIdentity::new(&role_name, &node_name, self.identity.proxy_id()),
            self.xds.clone(),
        )
        .with_descriptor(latest_descriptor);
        let (handle, mut supervisor_task) = supervisor.start(&shutdown);

        handle.write_config(bundle).await?;
        match handle.reload().await {
            Ok(epoch) => tracing::info!(epoch, "Proxy started"),
            Err(EnvoyError::Cancelled) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.publish_status(&handle).await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = &mut supervisor_task => {
                    if shutdown.is_triggered() {
                        return Ok(());
                    }
                    tracing::error!("Proxy is no longer running, stopping bridge");
                    self.cleanup();
                    return Err(BridgeError::ProxyExited);
                }
                Some(update) = streams.root_certificates.recv() => roots = update,
                Some(update) = streams.leaf_certificates.recv() => leaf = update,
            }

            let bundle = CertificateBundle::new(roots.clone(), leaf.clone());
            if let Err(e) = sink.publish(&bundle) {
                tracing::error!(error = %e, "Failed to publish certificates");
            }
            if let Err(e) = handle.write_config(bundle).await {
                tracing::error!(error = %e, "Failed to rewrite proxy bootstrap");
                continue;
            }
            match handle.reload().await {
                Ok(epoch) => {
                    tracing::info!(epoch, "Proxy reloaded with new certificates");
                    self.publish_status(&handle).await;
                }
                Err(e) => tracing::error!(error = %e, "Proxy reload failed, previous generation keeps serving"),
            }
        }

        tracing::info!("Shutdown requested, waiting for proxy instances to exit");
        drop(handle);
        if let Err(e) = supervisor_task.await {
            tracing::error!(error = %e, "Supervisor task failed");
        }
        self.cleanup();
        tracing::info!("Bridge stopped");
        Ok(())
    }

    async fn publish_status(&self, handle: &SupervisorHandle) {
        if let Ok(status) = handle.status().await {
            self.status.send_replace(Some(status));
        }
    }

    fn cleanup(&self) {
        if let Some(path) = self.xds.socket_file() {
            let _ = std::fs::remove_file(path);
        }
    }
}

async fn first_certificates(
    roots_rx: &mut mpsc::Receiver<CertificateSet>,
    leaf_rx: &mut mpsc::Receiver<CertificateAndKey>,
) -> Option<(CertificateSet, CertificateAndKey)> {
    let mut roots = None;
    let mut leaf = None;
    while roots.is_none() || leaf.is_none() {
        tokio::select! {
            update = roots_rx.recv(), if roots.is_none() => roots = Some(update?),
            update = leaf_rx.recv(), if leaf.is_none() => leaf = Some(update?),
        }
    }
    tracing::info!("Received first root CA set and leaf certificate");
    Some((roots?, leaf?))
}

/// Node name from the agent, then `HOSTNAME` or the host name, then a fixed fallback.
pub async fn resolve_node_name(client: &dyn ConnectClient) -> String {
    match client.node_name().await {
        Ok(name) if !name.is_empty() => return name,
        Ok(_) => tracing::warn!("Registry agent reported an empty node name"),
        Err(e) => tracing::warn!(error = %e, "Failed to read node name from the registry agent"),
    }
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            nix::unistd::gethostname()
                .ok()
                .and_then(|name| name.into_string().ok())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_NODE_NAME.to_string())
}
