//! Certificate and descriptor streaming.
//!
//! # Data Flow
//! ```text
//! root CA loop ──── dedup (active roots) ──→ root_certificates
//! descriptor loop ─────────────────────────→ descriptors
//!       │ first response
//!       └──→ leaf loop (target service) ───→ leaf_certificates
//! ```
//!
//! # Design Decisions
//! - Each loop is its own task with its own `BlockingQuery`
//! - Root sets are deduplicated; leaf certificates are always forwarded
//! - A send that would block is abandoned when shutdown fires

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::ProxyIdentity;
use crate::lifecycle::Shutdown;
use crate::model::{CertificateAndKey, CertificateSet};
use crate::registry::client::{ConnectClient, LEAF_ENDPOINT, PROXY_ENDPOINT, ROOTS_ENDPOINT};
use crate::registry::query::{BlockingQuery, DEFAULT_RETRY_DELAY};
use crate::registry::types::{ConnectProxyConfig, RootsInfo};

/// Updates are "latest wins"; a small buffer is enough.
const CHANNEL_CAPACITY: usize = 8;

/// Output of a running fetcher.
///
/// Each stream closes when its loop ends (shutdown, or for descriptors, a
/// non-blocking endpoint).
#[derive(Debug)]
pub struct FetcherStreams {
    pub root_certificates: mpsc::Receiver<CertificateSet>,
    pub leaf_certificates: mpsc::Receiver<CertificateAndKey>,
    pub descriptors: mpsc::Receiver<ConnectProxyConfig>,
}

pub struct CertificateFetcher {
    client: Arc<dyn ConnectClient>,
    proxy_id: String,
    retry_delay: Duration,
}

impl CertificateFetcher {
    pub fn new(client: Arc<dyn ConnectClient>, identity: &ProxyIdentity) -> Self {
        Self {
            client,
            proxy_id: identity.proxy_id().to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the delay between failed queries.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Spawn the root CA and descriptor loops.
    ///
    /// The leaf certificate loop is started by the descriptor loop once the
    /// target service is known. All loops stop when `shutdown` fires.
    pub fn start(&self, shutdown: &Shutdown) -> FetcherStreams {
        let (roots_tx, roots_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (leaf_tx, leaf_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (descriptors_tx, descriptors_rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(watch_roots(
            self.client.clone(),
            roots_tx,
            shutdown.clone(),
            self.retry_delay,
        ));
        tokio::spawn(watch_descriptor(
            self.client.clone(),
            self.proxy_id.clone(),
            descriptors_tx,
            leaf_tx,
            shutdown.clone(),
            self.retry_delay,
        ));

        tracing::info!(proxy_id = %self.proxy_id, "Certificate fetcher started");

        FetcherStreams {
            root_certificates: roots_rx,
            leaf_certificates: leaf_rx,
            descriptors: descriptors_rx,
        }
    }
}

/// Filter a root list down to the PEMs of its active roots.
pub fn active_roots(roots: RootsInfo) -> CertificateSet {
    roots
        .roots
        .into_iter()
        .filter(|root| root.active)
        .map(|root| root.root_cert)
        .collect()
}

async fn emit<T>(tx: &mpsc::Sender<T>, value: T, shutdown: &Shutdown) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        sent = tx.send(value) => sent.is_ok(),
    }
}

async fn watch_roots(
    client: Arc<dyn ConnectClient>,
    tx: mpsc::Sender<CertificateSet>,
    shutdown: Shutdown,
    retry_delay: Duration,
) {
    let mut query = BlockingQuery::new(retry_delay);
    let mut last: Option<CertificateSet> = None;

    while let Some((roots, _)) = query
        .next(ROOTS_ENDPOINT, &shutdown, |opts| client.root_certs(opts))
        .await
    {
        let active = active_roots(roots);
        if active.is_empty() {
            tracing::warn!("Registry reported no active root CA");
            continue;
        }
        if last.as_ref() == Some(&active) {
            tracing::debug!(roots = active.len(), "Root CAs unchanged");
            continue;
        }

        tracing::info!(roots = active.len(), "Root CAs updated");
        last = Some(active.clone());
        if !emit(&tx, active, &shutdown).await {
            break;
        }
    }
    tracing::debug!("Root CA loop stopped");
}

async fn watch_descriptor(
    client: Arc<dyn ConnectClient>,
    proxy_id: String,
    tx: mpsc::Sender<ConnectProxyConfig>,
    leaf_tx: mpsc::Sender<CertificateAndKey>,
    shutdown: Shutdown,
    retry_delay: Duration,
) {
    let mut query = BlockingQuery::new(retry_delay);
    let mut leaf_tx = Some(leaf_tx);

    while let Some((config, meta)) = query
        .next(PROXY_ENDPOINT, &shutdown, |opts| {
            client.proxy_config(&proxy_id, opts)
        })
        .await
    {
        if let Some(leaf_tx) = leaf_tx.take() {
            tracing::info!(
                proxy_id = %proxy_id,
                service = %config.target_service_name,
                "Proxy config received, watching leaf certificate"
            );
            tokio::spawn(watch_leaf(
                client.clone(),
                config.target_service_name.clone(),
                leaf_tx,
                shutdown.clone(),
                retry_delay,
            ));
        }

        if !emit(&tx, config, &shutdown).await {
            break;
        }
        if meta.last_index == 0 {
            tracing::info!(proxy_id = %proxy_id, "Proxy config endpoint is not blocking, descriptor loop finished");
            break;
        }
    }
    tracing::debug!("Descriptor loop stopped");
}

async fn watch_leaf(
    client: Arc<dyn ConnectClient>,
    service: String,
    tx: mpsc::Sender<CertificateAndKey>,
    shutdown: Shutdown,
    retry_delay: Duration,
) {
    let mut query = BlockingQuery::new(retry_delay);

    while let Some((leaf, _)) = query
        .next(LEAF_ENDPOINT, &shutdown, |opts| client.leaf_cert(&service, opts))
        .await
    {
        tracing::info!(service = %service, serial = %leaf.serial_number, "Leaf certificate received");
        let cert = CertificateAndKey {
            certificate: leaf.cert_pem,
            private_key: leaf.private_key_pem,
        };
        if !emit(&tx, cert, &shutdown).await {
            break;
        }
    }
    tracing::debug!(service = %service, "Leaf certificate loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::client::RegistryError;
    use crate::registry::types::{CaRoot, LeafCert, QueryMeta, QueryOptions};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Reply<T> = Result<(T, QueryMeta), RegistryError>;

    /// Replays scripted responses, then holds every further query forever
    /// like a long-poll with no change.
    #[derive(Default)]
    struct FakeClient {
        roots: Mutex<VecDeque<Reply<RootsInfo>>>,
        leaves: Mutex<VecDeque<Reply<LeafCert>>>,
        proxies: Mutex<VecDeque<Reply<ConnectProxyConfig>>>,
        leaf_services: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    async fn replay<T>(queue: &Mutex<VecDeque<Reply<T>>>) -> Reply<T> {
        let next = queue.lock().unwrap().pop_front();
        match next {
            Some(reply) => reply,
            None => std::future::pending().await,
        }
    }

    #[async_trait]
    impl ConnectClient for FakeClient {
        async fn root_certs(&self, _opts: QueryOptions) -> Reply<RootsInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            replay(&self.roots).await
        }

        async fn leaf_cert(&self, service: &str, _opts: QueryOptions) -> Reply<LeafCert> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.leaf_services.lock().unwrap().push(service.to_string());
            replay(&self.leaves).await
        }

        async fn proxy_config(&self, _proxy_id: &str, _opts: QueryOptions) -> Reply<ConnectProxyConfig> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            replay(&self.proxies).await
        }

        async fn node_name(&self) -> Result<String, RegistryError> {
            Ok("node-1".into())
        }
    }

    fn roots(index: u64, certs: &[(&str, bool)]) -> Reply<RootsInfo> {
        let roots = certs
            .iter()
            .map(|(pem, active)| CaRoot {
                id: pem.to_string(),
                root_cert: pem.to_string(),
                active: *active,
                ..Default::default()
            })
            .collect();
        Ok((
            RootsInfo {
                roots,
                ..Default::default()
            },
            QueryMeta { last_index: index },
        ))
    }

    fn proxy(index: u64, service: &str) -> Reply<ConnectProxyConfig> {
        Ok((
            ConnectProxyConfig {
                proxy_service_id: format!("{service}-proxy"),
                target_service_name: service.to_string(),
                ..Default::default()
            },
            QueryMeta { last_index: index },
        ))
    }

    fn leaf(index: u64, serial: &str) -> Reply<LeafCert> {
        Ok((
            LeafCert {
                serial_number: serial.to_string(),
                cert_pem: format!("cert-{serial}"),
                private_key_pem: format!("key-{serial}"),
                ..Default::default()
            },
            QueryMeta { last_index: index },
        ))
    }

    fn transport_error() -> RegistryError {
        RegistryError::Status {
            endpoint: ROOTS_ENDPOINT,
            status: 503,
            body: "no leader".into(),
        }
    }

    fn start(client: Arc<FakeClient>, shutdown: &Shutdown) -> FetcherStreams {
        let identity = ProxyIdentity::new("web-proxy", "");
        CertificateFetcher::new(client, &identity)
            .with_retry_delay(Duration::from_millis(5))
            .start(shutdown)
    }

    async fn recv<T>(rx: &mut mpsc::Receiver<T>) -> Option<T> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .ok()
            .flatten()
    }

    async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::Receiver<T>) {
        let extra = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(extra.is_err(), "unexpected item: {:?}", extra);
    }

    #[tokio::test]
    async fn test_repeated_root_sets_are_emitted_once() {
        let client = Arc::new(FakeClient::default());
        *client.roots.lock().unwrap() = VecDeque::from(vec![
            roots(1, &[("A", true)]),
            roots(2, &[("A", true), ("old", false)]),
            roots(3, &[("B", true)]),
        ]);
        let shutdown = Shutdown::new();
        let mut streams = start(client, &shutdown);

        let first = recv(&mut streams.root_certificates).await.unwrap();
        assert_eq!(first, CertificateSet(vec!["A".into()]));
        let second = recv(&mut streams.root_certificates).await.unwrap();
        assert_eq!(second, CertificateSet(vec!["B".into()]));
        assert_quiet(&mut streams.root_certificates).await;

        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_root_loop_retries_after_errors() {
        let client = Arc::new(FakeClient::default());
        *client.roots.lock().unwrap() = VecDeque::from(vec![
            Err(transport_error()),
            Err(transport_error()),
            roots(4, &[("A", true)]),
        ]);
        let shutdown = Shutdown::new();
        let mut streams = start(client, &shutdown);

        let set = recv(&mut streams.root_certificates).await.unwrap();
        assert_eq!(set.len(), 1);
        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_leaf_loop_starts_after_first_descriptor() {
        let client = Arc::new(FakeClient::default());
        *client.proxies.lock().unwrap() =
            VecDeque::from(vec![proxy(10, "web"), proxy(11, "web")]);
        *client.leaves.lock().unwrap() = VecDeque::from(vec![leaf(5, "01"), leaf(6, "02")]);
        let shutdown = Shutdown::new();
        let mut streams = start(client.clone(), &shutdown);

        assert_eq!(
            recv(&mut streams.descriptors).await.unwrap().target_service_name,
            "web"
        );
        assert!(recv(&mut streams.descriptors).await.is_some());

        // Leaf certificates are forwarded without dedup.
        let first = recv(&mut streams.leaf_certificates).await.unwrap();
        let second = recv(&mut streams.leaf_certificates).await.unwrap();
        assert_eq!(first.certificate, "cert-01");
        assert_eq!(second.private_key, "key-02");

        // Started exactly once even though two descriptors arrived.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let services = client.leaf_services.lock().unwrap().clone();
        assert_eq!(services, vec!["web", "web", "web"]);
        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_non_blocking_descriptor_ends_loop() {
        let client = Arc::new(FakeClient::default());
        *client.proxies.lock().unwrap() = VecDeque::from(vec![proxy(0, "web"), proxy(0, "db")]);
        let shutdown = Shutdown::new();
        let mut streams = start(client, &shutdown);

        assert!(recv(&mut streams.descriptors).await.is_some());
        // The loop ended, so the stream closes instead of yielding "db".
        assert!(recv(&mut streams.descriptors).await.is_none());
        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_no_queries_after_shutdown() {
        let client = Arc::new(FakeClient::default());
        // Every query fails, so loops keep retrying until cancelled.
        *client.roots.lock().unwrap() = (0..1000).map(|_| Err(transport_error())).collect();
        let shutdown = Shutdown::new();
        let mut streams = start(client.clone(), &shutdown);

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.trigger();
        assert!(recv(&mut streams.root_certificates).await.is_none());
        assert!(recv(&mut streams.descriptors).await.is_none());

        let calls = client.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn test_active_roots_keep_order() {
        let (info, _) = roots(1, &[("A", true), ("B", false), ("C", true)]).unwrap();
        assert_eq!(active_roots(info), CertificateSet(vec!["A".into(), "C".into()]));
    }
}
