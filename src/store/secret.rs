//! Secret objects carrying TLS material for the control plane.

use std::collections::BTreeMap;
use std::fmt;

use crate::model::CertificateBundle;
use crate::store::StoreObject;

/// Key holding the leaf certificate chain.
pub const CERTIFICATE_CHAIN_KEY: &str = "ca_chain";
/// Key holding the leaf private key.
pub const PRIVATE_KEY_KEY: &str = "private_key";
/// Key holding the concatenated root CA bundle.
pub const ROOT_CA_KEY: &str = "root_ca";

/// A named bag of string values.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub data: BTreeMap<String, String>,
}

impl Secret {
    /// Build the secret representation of a certificate bundle.
    pub fn from_bundle(name: impl Into<String>, bundle: &CertificateBundle) -> Self {
        let mut data = BTreeMap::new();
        data.insert(CERTIFICATE_CHAIN_KEY.to_string(), bundle.leaf.certificate.clone());
        data.insert(PRIVATE_KEY_KEY.to_string(), bundle.leaf.private_key.clone());
        data.insert(ROOT_CA_KEY.to_string(), bundle.root_cas.to_pem_bundle());
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

impl StoreObject for Secret {
    fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}
