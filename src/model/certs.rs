//! Certificate material delivered by the registry.

use std::fmt;

/// An ordered set of active root CA certificates (PEM).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateSet(pub Vec<String>);

impl CertificateSet {
    /// Number of certificates in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenate every certificate, in order, into a single PEM bundle.
    pub fn to_pem_bundle(&self) -> String {
        self.0.concat()
    }
}

impl FromIterator<String> for CertificateSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A leaf certificate together with its private key.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CertificateAndKey {
    pub certificate: String,
    pub private_key: String,
}

impl fmt::Debug for CertificateAndKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAndKey")
            .field("certificate_len", &self.certificate.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Everything the proxy needs for mutual TLS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateBundle {
    pub leaf: CertificateAndKey,
    pub root_cas: CertificateSet,
}

impl CertificateBundle {
    pub fn new(root_cas: CertificateSet, leaf: CertificateAndKey) -> Self {
        Self { leaf, root_cas }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pem_bundle_keeps_order() {
        let set: CertificateSet = vec!["A\n".to_string(), "B\n".to_string()]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.to_pem_bundle(), "A\nB\n");
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let leaf = CertificateAndKey {
            certificate: "cert".into(),
            private_key: "super-secret".into(),
        };
        let rendered = format!("{:?}", leaf);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("redacted"));
    }
}
