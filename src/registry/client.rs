//! HTTP client for the registry agent's connect endpoints.
//!
//! # Responsibilities
//! - Issue blocking queries (`index` + `wait`) and report the new index
//! - Attach the ACL token, basic auth and datacenter to every request
//! - Keep the client-side timeout longer than the server-side hold time

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config::RegistryConfig;
use crate::registry::types::{ConnectProxyConfig, LeafCert, QueryMeta, QueryOptions, RootsInfo};

pub const ROOTS_ENDPOINT: &str = "ca_roots";
pub const LEAF_ENDPOINT: &str = "ca_leaf";
pub const PROXY_ENDPOINT: &str = "proxy_config";
pub const AGENT_SELF_ENDPOINT: &str = "agent_self";

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Extra time the HTTP client waits beyond the server-side hold time.
const TIMEOUT_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid registry address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to build registry HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{endpoint}: request failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint}: unexpected status {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("{endpoint}: failed to decode response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint}: malformed X-Consul-Index header '{value}'")]
    InvalidIndex { endpoint: &'static str, value: String },
}

/// The subset of the registry agent API the bridge consumes.
#[async_trait]
pub trait ConnectClient: Send + Sync + 'static {
    /// Root CA list.
    async fn root_certs(&self, opts: QueryOptions) -> Result<(RootsInfo, QueryMeta), RegistryError>;

    /// Leaf certificate for `service`.
    async fn leaf_cert(
        &self,
        service: &str,
        opts: QueryOptions,
    ) -> Result<(LeafCert, QueryMeta), RegistryError>;

    /// Connect configuration of the proxy registered as `proxy_id`.
    async fn proxy_config(
        &self,
        proxy_id: &str,
        opts: QueryOptions,
    ) -> Result<(ConnectProxyConfig, QueryMeta), RegistryError>;

    /// Name of the node the agent runs on.
    async fn node_name(&self) -> Result<String, RegistryError>;
}

/// [`ConnectClient`] backed by the agent's HTTP API.
#[derive(Clone)]
pub struct HttpConnectClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
    basic_auth: Option<(String, String)>,
    datacenter: Option<String>,
    wait: Duration,
}

impl HttpConnectClient {
    /// Build a client for the agent described by `config`.
    ///
    /// `token` takes precedence over `config.token`.
    pub fn new(config: &RegistryConfig, token: Option<&str>) -> Result<Self, RegistryError> {
        let raw = format!("{}://{}", config.scheme, config.address);
        let base = Url::parse(&raw).map_err(|e| RegistryError::InvalidAddress {
            address: config.address.clone(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() || base.host_str().is_none() {
            return Err(RegistryError::InvalidAddress {
                address: config.address.clone(),
                reason: "no host".to_string(),
            });
        }

        let basic_auth = config.http_auth.as_deref().map(|auth| match auth.split_once(':') {
            Some((user, pass)) => (user.to_string(), pass.to_string()),
            None => (auth.to_string(), String::new()),
        });

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(RegistryError::Client)?;

        Ok(Self {
            http,
            base,
            token: token.map(str::to_string).or_else(|| config.token.clone()),
            basic_auth,
            datacenter: config.datacenter.clone(),
            wait: Duration::from_secs(config.wait_time_secs),
        })
    }

    /// Base URL every endpoint is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint_url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // `new` rejects cannot-be-a-base URLs.
        if let Ok(mut path) = url.path_segments_mut() {
            path.clear().extend(segments);
        }
        url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: Url,
        opts: Option<QueryOptions>,
    ) -> Result<(T, QueryMeta), RegistryError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(dc) = &self.datacenter {
            query.push(("dc", dc.clone()));
        }
        let mut timeout = TIMEOUT_MARGIN;
        if let Some(opts) = opts.filter(|o| o.wait_index > 0) {
            query.push(("index", opts.wait_index.to_string()));
            query.push(("wait", format!("{}s", self.wait.as_secs())));
            timeout += self.wait;
        }

        let mut request = self.http.get(url).query(&query).timeout(timeout);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }
        if let Some((user, pass)) = &self.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .map_err(|source| RegistryError::Transport { endpoint, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Status {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        let meta = QueryMeta {
            last_index: parse_index(endpoint, response.headers())?,
        };
        let body = response
            .json::<T>()
            .await
            .map_err(|source| RegistryError::Decode { endpoint, source })?;
        Ok((body, meta))
    }
}

fn parse_index(endpoint: &'static str, headers: &HeaderMap) -> Result<u64, RegistryError> {
    let Some(value) = headers.get(INDEX_HEADER) else {
        return Ok(0);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| RegistryError::InvalidIndex {
            endpoint,
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        })
}

#[derive(Deserialize)]
struct AgentSelf {
    #[serde(rename = "Config")]
    config: AgentSelfConfig,
}

#[derive(Deserialize)]
struct AgentSelfConfig {
    #[serde(rename = "NodeName", default)]
    node_name: String,
}

#[async_trait]
impl ConnectClient for HttpConnectClient {
    async fn root_certs(&self, opts: QueryOptions) -> Result<(RootsInfo, QueryMeta), RegistryError> {
        let url = self.endpoint_url(&["v1", "agent", "connect", "ca", "roots"]);
        self.get(ROOTS_ENDPOINT, url, Some(opts)).await
    }

    async fn leaf_cert(
        &self,
        service: &str,
        opts: QueryOptions,
    ) -> Result<(LeafCert, QueryMeta), RegistryError> {
        let url = self.endpoint_url(&["v1", "agent", "connect", "ca", "leaf", service]);
        self.get(LEAF_ENDPOINT, url, Some(opts)).await
    }

    async fn proxy_config(
        &self,
        proxy_id: &str,
        opts: QueryOptions,
    ) -> Result<(ConnectProxyConfig, QueryMeta), RegistryError> {
        let url = self.endpoint_url(&["v1", "agent", "connect", "proxy", proxy_id]);
        self.get(PROXY_ENDPOINT, url, Some(opts)).await
    }

    async fn node_name(&self) -> Result<String, RegistryError> {
        let url = self.endpoint_url(&["v1", "agent", "self"]);
        let (agent, _) = self.get::<AgentSelf>(AGENT_SELF_ENDPOINT, url, None).await?;
        Ok(agent.config.node_name)
    }
}
