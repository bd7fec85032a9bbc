//! Certificate sink: publishes bundles to the secret store.

use crate::model::CertificateBundle;
use crate::store::{MemoryStore, Secret, StoreError};

/// Writes the current certificate bundle as one named secret.
#[derive(Clone)]
pub struct CertificateSink {
    secrets: MemoryStore<Secret>,
    name: String,
}

impl CertificateSink {
    pub fn new(secrets: MemoryStore<Secret>, name: impl Into<String>) -> Self {
        Self {
            secrets,
            name: name.into(),
        }
    }

    /// Create the secret, or update it if it already exists.
    ///
    /// An unchanged bundle is not rewritten.
    pub fn publish(&self, bundle: &CertificateBundle) -> Result<(), StoreError> {
        let secret = Secret::from_bundle(self.name.clone(), bundle);
        match self.secrets.create(secret.clone()) {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {
                if self.secrets.get(&self.name).ok().as_ref() == Some(&secret) {
                    tracing::debug!(secret = %self.name, "Certificates unchanged");
                    return Ok(());
                }
                self.secrets.update(secret)?;
            }
            Err(e) => return Err(e),
        }
        tracing::info!(
            secret = %self.name,
            root_cas = bundle.root_cas.len(),
            "Certificates published"
        );
        Ok(())
    }
}
