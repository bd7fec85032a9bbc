//! Wire types of the registry agent's connect API.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Parameters of a single (possibly blocking) query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Index of the last response seen; 0 asks for an immediate answer.
    pub wait_index: u64,
}

/// Metadata returned alongside every query response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryMeta {
    /// Index to wait on next; 0 means the endpoint does not block.
    pub last_index: u64,
}

/// Root CA list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RootsInfo {
    #[serde(rename = "ActiveRootID", default)]
    pub active_root_id: String,
    #[serde(default)]
    pub trust_domain: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roots: Vec<CaRoot>,
}

/// A single CA root as reported by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CaRoot {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub root_cert: String,
    #[serde(default)]
    pub active: bool,
}

/// Leaf certificate issued to a service.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LeafCert {
    #[serde(default)]
    pub serial_number: String,
    #[serde(rename = "CertPEM", default)]
    pub cert_pem: String,
    #[serde(rename = "PrivateKeyPEM", default)]
    pub private_key_pem: String,
    #[serde(default)]
    pub service: String,
    #[serde(rename = "ServiceURI", default)]
    pub service_uri: String,
}

impl std::fmt::Debug for LeafCert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafCert")
            .field("serial_number", &self.serial_number)
            .field("service", &self.service)
            .field("service_uri", &self.service_uri)
            .finish_non_exhaustive()
    }
}

/// Connect proxy configuration for one proxy instance.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectProxyConfig {
    #[serde(rename = "ProxyServiceID", default)]
    pub proxy_service_id: String,
    #[serde(rename = "TargetServiceID", default)]
    pub target_service_id: String,
    #[serde(default)]
    pub target_service_name: String,
    #[serde(default)]
    pub content_hash: String,
    /// Free-form proxy configuration; decoded by `ProxyDescriptor`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub config: Map<String, Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
