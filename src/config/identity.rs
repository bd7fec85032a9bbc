//! Proxy identity supplied by the registry agent through the environment.

use std::fmt;

use thiserror::Error;

pub const CONNECT_PROXY_ID: &str = "CONNECT_PROXY_ID";
pub const CONNECT_PROXY_TOKEN: &str = "CONNECT_PROXY_TOKEN";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("{CONNECT_PROXY_ID} is not set; can't detect proxy identity from the environment")]
    MissingProxyId,
}

/// Who this bridge is, as far as the registry is concerned.
///
/// Read once at startup and never changed afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyIdentity {
    proxy_id: String,
    auth_token: String,
}

impl ProxyIdentity {
    pub fn new(proxy_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            proxy_id: proxy_id.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Read the identity from the process environment.
    pub fn from_env() -> Result<Self, IdentityError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the identity through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IdentityError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let proxy_id = lookup(CONNECT_PROXY_ID)
            .filter(|id| !id.is_empty())
            .ok_or(IdentityError::MissingProxyId)?;
        let auth_token = lookup(CONNECT_PROXY_TOKEN).unwrap_or_default();
        Ok(Self::new(proxy_id, auth_token))
    }

    pub fn proxy_id(&self) -> &str {
        &self.proxy_id
    }

    /// The token, or `None` when the agent did not hand one out.
    pub fn auth_token(&self) -> Option<&str> {
        Some(self.auth_token.as_str()).filter(|t| !t.is_empty())
    }
}

impl fmt::Debug for ProxyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyIdentity")
            .field("proxy_id", &self.proxy_id)
            .field("has_token", &!self.auth_token.is_empty())
            .finish()
    }
}
