//! Bootstrap configuration for the proxy.
//!
//! The bootstrap only points the proxy at the control plane; listeners and
//! clusters arrive over aggregated discovery.

use std::fmt;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde_json::{json, Value};

use crate::model::ProxyDescriptor;

/// Name of the static cluster that reaches the control plane.
pub const XDS_CLUSTER: &str = "xds_cluster";

const SOCKET_PREFIX: &str = "connect-bridge-";
const HTTP_PROTOCOL_OPTIONS: &str = "envoy.extensions.upstreams.http.v3.HttpProtocolOptions";

/// Where the control plane serves discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XdsAddress {
    Tcp { host: String, port: u16 },
    /// A unix socket path; a leading `@` selects the abstract namespace.
    Unix(String),
}

impl XdsAddress {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        XdsAddress::Tcp {
            host: host.into(),
            port,
        }
    }

    /// A fresh, randomly named unix socket.
    ///
    /// Abstract on Linux; a file under the temp dir elsewhere.
    pub fn random_unix() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..10).map(|_| char::from(rng.gen_range(b'a'..=b'z'))).collect();
        let name = format!("{SOCKET_PREFIX}{suffix}");
        if cfg!(target_os = "linux") {
            XdsAddress::Unix(format!("@{name}"))
        } else {
            XdsAddress::Unix(std::env::temp_dir().join(name).to_string_lossy().into_owned())
        }
    }

    /// Filesystem entry backing this address, if any.
    pub fn socket_file(&self) -> Option<&Path> {
        match self {
            XdsAddress::Unix(path) if !path.starts_with('@') => Some(Path::new(path)),
            _ => None,
        }
    }

    fn cluster_type(&self) -> &'static str {
        match self {
            XdsAddress::Tcp { .. } => "STRICT_DNS",
            XdsAddress::Unix(_) => "STATIC",
        }
    }

    fn to_envoy(&self) -> Value {
        match self {
            XdsAddress::Tcp { host, port } => json!({
                "socket_address": {
                    "protocol": "TCP",
                    "address": host,
                    "port_value": port,
                }
            }),
            XdsAddress::Unix(path) => json!({ "pipe": { "path": path } }),
        }
    }
}

impl fmt::Display for XdsAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XdsAddress::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            XdsAddress::Unix(path) => write!(f, "unix://{path}"),
        }
    }
}

/// Identity the proxy presents to the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub id: String,
    pub cluster: String,
}

impl NodeIdentity {
    /// `<role>~<node>` with the proxy id as cluster.
    pub fn new(role_name: &str, node_name: &str, proxy_id: &str) -> Self {
        Self {
            id: format!("{role_name}~{node_name}"),
            cluster: proxy_id.to_string(),
        }
    }
}

/// PEM files the proxy reads its TLS material from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub certificate_chain: PathBuf,
    pub private_key: PathBuf,
    pub root_cas: PathBuf,
}

impl TlsFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            certificate_chain: dir.join("leaf.crt"),
            private_key: dir.join("leaf.key"),
            root_cas: dir.join("rootcas.crt"),
        }
    }
}

/// Everything that goes into a bootstrap document.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapParams<'a> {
    pub node: &'a NodeIdentity,
    pub xds: &'a XdsAddress,
    pub admin_address: &'a str,
    pub admin_port: u16,
    /// Name of the TLS secret; `<name>-validation` holds the root CAs.
    pub secret_name: &'a str,
    /// When set, the secrets are declared statically from these files.
    pub tls_files: Option<&'a TlsFiles>,
    pub descriptor: Option<&'a ProxyDescriptor>,
}

/// Render the bootstrap document.
pub fn render(params: &BootstrapParams<'_>) -> Value {
    let mut node = json!({
        "id": params.node.id,
        "cluster": params.node.cluster,
    });
    if let Some(descriptor) = params.descriptor {
        node["metadata"] = json!({
            "proxy_service_id": descriptor.proxy_service_id,
            "target_service_id": descriptor.target_service_id,
            "target_service_name": descriptor.target_service_name,
        });
    }

    let ads = json!({ "ads": {}, "resource_api_version": "V3" });

    let mut static_resources = json!({
        "clusters": [{
            "name": XDS_CLUSTER,
            "connect_timeout": "5s",
            "type": params.xds.cluster_type(),
            "typed_extension_protocol_options": {
                HTTP_PROTOCOL_OPTIONS: {
                    "@type": format!("type.googleapis.com/{HTTP_PROTOCOL_OPTIONS}"),
                    "explicit_http_config": { "http2_protocol_options": {} },
                }
            },
            "load_assignment": {
                "cluster_name": XDS_CLUSTER,
                "endpoints": [{
                    "lb_endpoints": [{ "endpoint": { "address": params.xds.to_envoy() } }]
                }]
            },
        }]
    });
    if let Some(files) = params.tls_files {
        static_resources["secrets"] = json!([
            {
                "name": params.secret_name,
                "tls_certificate": {
                    "certificate_chain": { "filename": files.certificate_chain },
                    "private_key": { "filename": files.private_key },
                }
            },
            {
                "name": format!("{}-validation", params.secret_name),
                "validation_context": {
                    "trusted_ca": { "filename": files.root_cas },
                }
            }
        ]);
    }

    json!({
        "node": node,
        "admin": {
            "access_log": [{
                "name": "envoy.access_loggers.stderr",
                "typed_config": {
                    "@type": "type.googleapis.com/envoy.extensions.access_loggers.stream.v3.StderrAccessLog"
                }
            }],
            "address": {
                "socket_address": {
                    "protocol": "TCP",
                    "address": params.admin_address,
                    "port_value": params.admin_port,
                }
            }
        },
        "dynamic_resources": {
            "lds_config": ads,
            "cds_config": ads,
            "ads_config": {
                "api_type": "GRPC",
                "transport_api_version": "V3",
                "grpc_services": [{ "envoy_grpc": { "cluster_name": XDS_CLUSTER } }],
            }
        },
        "static_resources": static_resources,
    })
}
