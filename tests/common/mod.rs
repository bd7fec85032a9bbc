//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;

const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// In-process registry agent with blocking-query semantics.
///
/// Every `set_*` call bumps a global index. A query whose `index` equals the
/// resource's current index is held until the resource changes or `wait`
/// elapses, mirroring the agent's long-poll behavior.
#[derive(Clone)]
pub struct MockRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<RegistryState>,
    version: watch::Sender<u64>,
}

#[derive(Default)]
struct RegistryState {
    index: u64,
    resources: HashMap<String, (u64, Value)>,
    node_name: String,
    tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BlockingParams {
    index: Option<u64>,
    wait: Option<String>,
}

impl MockRegistry {
    pub fn new(node_name: &str) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RegistryState {
                    node_name: node_name.to_string(),
                    ..Default::default()
                }),
                version,
            }),
        }
    }

    /// Bind on an ephemeral port and serve in the background.
    pub async fn serve(&self) -> SocketAddr {
        let app = Router::new()
            .route("/v1/agent/self", get(agent_self))
            .route("/v1/agent/connect/ca/roots", get(roots))
            .route("/v1/agent/connect/ca/leaf/{service}", get(leaf))
            .route("/v1/agent/connect/proxy/{proxy_id}", get(proxy))
            .with_state(self.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    pub fn set_roots(&self, pems: &[&str]) {
        let roots: Vec<Value> = pems
            .iter()
            .enumerate()
            .map(|(i, pem)| {
                json!({
                    "ID": format!("root-{i}"),
                    "Name": format!("Root {i}"),
                    "RootCert": pem,
                    "Active": i == 0,
                })
            })
            .collect();
        self.set(
            "roots",
            json!({
                "ActiveRootID": "root-0",
                "TrustDomain": "11111111-2222-3333-4444-555555555555.consul",
                "Roots": roots,
            }),
        );
    }

    pub fn set_leaf(&self, service: &str, cert: &str, key: &str) {
        self.set(
            &format!("leaf/{service}"),
            json!({
                "SerialNumber": format!("serial-{cert}"),
                "CertPEM": cert,
                "PrivateKeyPEM": key,
                "Service": service,
                "ServiceURI": format!("spiffe://cluster.local/svc/{service}"),
            }),
        );
    }

    pub fn set_proxy(&self, proxy_id: &str, service: &str, config: Value) {
        self.set(
            &format!("proxy/{proxy_id}"),
            json!({
                "ProxyServiceID": proxy_id,
                "TargetServiceID": service,
                "TargetServiceName": service,
                "ContentHash": format!("hash-{}", self.index() + 1),
                "Config": config,
            }),
        );
    }

    /// Current global index.
    pub fn index(&self) -> u64 {
        self.inner.state.lock().unwrap().index
    }

    /// ACL tokens presented so far, in request order.
    pub fn tokens(&self) -> Vec<String> {
        self.inner.state.lock().unwrap().tokens.clone()
    }

    fn set(&self, key: &str, body: Value) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.index += 1;
            let index = state.index;
            state.resources.insert(key.to_string(), (index, body));
        }
        self.inner.version.send_modify(|v| *v += 1);
    }

    fn lookup(&self, key: &str) -> Option<(u64, Value)> {
        self.inner.state.lock().unwrap().resources.get(key).cloned()
    }

    fn record_token(&self, headers: &HeaderMap) {
        if let Some(token) = headers.get("X-Consul-Token").and_then(|v| v.to_str().ok()) {
            self.inner.state.lock().unwrap().tokens.push(token.to_string());
        }
    }

    async fn blocking(&self, key: String, params: BlockingParams, headers: HeaderMap) -> Response {
        self.record_token(&headers);
        let mut changes = self.inner.version.subscribe();
        let wait = params.wait.as_deref().and_then(parse_wait).unwrap_or(DEFAULT_WAIT);
        let deadline = Instant::now() + wait;
        let requested = params.index.unwrap_or(0);

        loop {
            let Some((index, body)) = self.lookup(&key) else {
                return (StatusCode::NOT_FOUND, format!("unknown resource {key}")).into_response();
            };
            if requested == 0 || index != requested {
                return indexed(index, body);
            }
            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                _ => return indexed(index, body),
            }
        }
    }
}

fn parse_wait(raw: &str) -> Option<Duration> {
    raw.strip_suffix('s')?.parse().ok().map(Duration::from_secs)
}

fn indexed(index: u64, body: Value) -> Response {
    let mut response = Json(body).into_response();
    response
        .headers_mut()
        .insert("X-Consul-Index", HeaderValue::from(index));
    response
}

async fn agent_self(State(registry): State<MockRegistry>, headers: HeaderMap) -> Response {
    registry.record_token(&headers);
    let node_name = registry.inner.state.lock().unwrap().node_name.clone();
    Json(json!({ "Config": { "NodeName": node_name } })).into_response()
}

async fn roots(
    State(registry): State<MockRegistry>,
    Query(params): Query<BlockingParams>,
    headers: HeaderMap,
) -> Response {
    registry.blocking("roots".to_string(), params, headers).await
}

async fn leaf(
    State(registry): State<MockRegistry>,
    UrlPath(service): UrlPath<String>,
    Query(params): Query<BlockingParams>,
    headers: HeaderMap,
) -> Response {
    registry.blocking(format!("leaf/{service}"), params, headers).await
}

async fn proxy(
    State(registry): State<MockRegistry>,
    UrlPath(proxy_id): UrlPath<String>,
    Query(params): Query<BlockingParams>,
    headers: HeaderMap,
) -> Response {
    registry.blocking(format!("proxy/{proxy_id}"), params, headers).await
}

/// Script standing in for the proxy binary.
///
/// Logs its first three arguments to `args.log` and every SIGTERM to
/// `signals.log`, then runs `body`.
pub fn proxy_script(dir: &Path, body: &str) -> String {
    let path = dir.join("fake-envoy.sh");
    let contents = format!(
        "#!/bin/sh\nARGS=\"{}\"\nSIGNALS=\"{}\"\necho \"$1 $2 $3\" >> \"$ARGS\"\n{}\n",
        dir.join("args.log").display(),
        dir.join("signals.log").display(),
        body
    );
    std::fs::write(&path, contents).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

/// Runs until SIGTERM.
pub const SERVE: &str =
    "trap 'echo TERM >> \"$SIGNALS\"; exit 0' TERM\nwhile true; do sleep 1 & wait $!; done";

pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
