//! Typed proxy descriptor decoded from the registry's opaque proxy config.
//!
//! # Responsibilities
//! - Map the free-form `Config` object of a connect proxy onto typed fields
//! - Apply explicit defaults for optional fields
//! - Report malformed or missing fields by path
//!
//! # Design Decisions
//! - No reflection-style structure walking: each field is read by hand
//! - Integers accept JSON integers, integral floats and decimal strings,
//!   since registry configs written in HCL often arrive as floats

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::registry::types::ConnectProxyConfig;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
const DEFAULT_DESTINATION_TYPE: &str = "service";

/// Errors raised while decoding a proxy descriptor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// A required field is absent.
    #[error("missing required field `{0}`")]
    MissingField(String),

    /// A field is present but has the wrong type or an out-of-range value.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
}

/// A service dependency reachable through a local outbound listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Upstream {
    pub destination_name: String,
    pub destination_type: String,
    pub local_bind_port: u16,
}

/// Everything the bridge needs to know about the local proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyDescriptor {
    pub proxy_service_id: String,
    pub target_service_id: String,
    pub target_service_name: String,
    pub bind_address: String,
    pub bind_port: u16,
    pub local_service_address: String,
    pub upstreams: Vec<Upstream>,
}

impl ProxyDescriptor {
    /// Decode the descriptor attached to a connect proxy config response.
    pub fn from_connect_config(info: &ConnectProxyConfig) -> Result<Self, DescriptorError> {
        let config = &info.config;

        let bind_address = optional_string(config, "bind_address")?
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
        let bind_port = required_port(config, "bind_port", "bind_port")?;
        let local_service_address = optional_string(config, "local_service_address")?
            .ok_or_else(|| DescriptorError::MissingField("local_service_address".into()))?;

        let upstreams = match config.get("upstreams") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| decode_upstream(i, item))
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(DescriptorError::InvalidField {
                    field: "upstreams".into(),
                    reason: format!("expected an array, got {}", type_name(other)),
                })
            }
        };

        Ok(Self {
            proxy_service_id: info.proxy_service_id.clone(),
            target_service_id: info.target_service_id.clone(),
            target_service_name: info.target_service_name.clone(),
            bind_address,
            bind_port,
            local_service_address,
            upstreams,
        })
    }

    /// Upstreams ordered by local bind port. The sort is stable, so entries
    /// sharing a port keep their registry order.
    pub fn sorted_upstreams(&self) -> Vec<Upstream> {
        let mut upstreams = self.upstreams.clone();
        upstreams.sort_by_key(|u| u.local_bind_port);
        upstreams
    }
}

fn decode_upstream(index: usize, item: &Value) -> Result<Upstream, DescriptorError> {
    let path = |field: &str| format!("upstreams[{}].{}", index, field);

    let object = item.as_object().ok_or_else(|| DescriptorError::InvalidField {
        field: format!("upstreams[{}]", index),
        reason: format!("expected an object, got {}", type_name(item)),
    })?;

    let destination_name = match object.get("destination_name") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::String(_)) => {
            return Err(DescriptorError::InvalidField {
                field: path("destination_name"),
                reason: "must not be empty".into(),
            })
        }
        Some(other) => {
            return Err(DescriptorError::InvalidField {
                field: path("destination_name"),
                reason: format!("expected a string, got {}", type_name(other)),
            })
        }
        None => return Err(DescriptorError::MissingField(path("destination_name"))),
    };

    let destination_type = match object.get("destination_type") {
        None | Some(Value::Null) => DEFAULT_DESTINATION_TYPE.to_string(),
        Some(Value::String(s)) if s.is_empty() => DEFAULT_DESTINATION_TYPE.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            return Err(DescriptorError::InvalidField {
                field: path("destination_type"),
                reason: format!("expected a string, got {}", type_name(other)),
            })
        }
    };

    let local_bind_port = required_port(object, "local_bind_port", &path("local_bind_port"))?;

    Ok(Upstream {
        destination_name,
        destination_type,
        local_bind_port,
    })
}

fn optional_string(map: &Map<String, Value>, key: &str) -> Result<Option<String>, DescriptorError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(DescriptorError::InvalidField {
            field: key.to_string(),
            reason: format!("expected a string, got {}", type_name(other)),
        }),
    }
}

fn required_port(map: &Map<String, Value>, key: &str, path: &str) -> Result<u16, DescriptorError> {
    let invalid = |reason: String| DescriptorError::InvalidField {
        field: path.to_string(),
        reason,
    };

    let raw: u64 = match map.get(key) {
        None | Some(Value::Null) => return Err(DescriptorError::MissingField(path.to_string())),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_u64() {
                v
            } else if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0) {
                f as u64
            } else {
                return Err(invalid(format!("expected a non-negative integer, got {}", n)));
            }
        }
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| invalid(format!("expected a port number, got {:?}", s)))?,
        Some(other) => return Err(invalid(format!("expected a number, got {}", type_name(other)))),
    };

    u16::try_from(raw).map_err(|_| invalid(format!("port {} out of range", raw)))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
