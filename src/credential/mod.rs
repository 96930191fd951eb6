//! # Credential Discovery
//!
//! Locates the bootstrap credential in a privileged namespace.
//!
//! The cluster API is reached through the [`CredentialStore`] trait so the locator
//! can run against the live cluster ([`cluster::KubeCredentialStore`]) or an
//! in-memory fixture ([`memory::MemoryCredentialStore`]).

pub mod cluster;
pub mod locator;
pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use cluster::KubeCredentialStore;
pub use locator::CredentialLocator;
pub use memory::MemoryCredentialStore;

/// Raw bootstrap credential bytes. Wiped on drop and never printed.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    bytes: Vec<u8>,
}

impl Credential {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&str> for Credential {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes redacted>)", self.bytes.len())
    }
}

/// Base64 text form of a [`Credential`], as stored in `Secret.data`
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncodedCredential(String);

impl EncodedCredential {
    pub fn new(encoded: String) -> Self {
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncodedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedCredential(<redacted>)")
    }
}

/// A secret as returned by a namespace listing
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StoredSecret {
    pub name: String,
    /// Decoded data values keyed by data key
    pub data: BTreeMap<String, Vec<u8>>,
}

impl StoredSecret {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        self.data.insert(key.into(), value.as_ref().to_vec());
        self
    }
}

impl fmt::Debug for StoredSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredSecret")
            .field("name", &self.name)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum LocatorError {
    /// The cluster API could not be reached, or rejected the request
    #[error("failed to list secrets in namespace '{namespace}': {message}")]
    Transport { namespace: String, message: String },
    #[error("no secret with prefix '{prefix}' in namespace '{namespace}'")]
    NotFound { namespace: String, prefix: String },
    #[error("secret '{secret}' in namespace '{namespace}' has no data key '{key}'")]
    MissingKey {
        namespace: String,
        secret: String,
        key: String,
    },
    #[error("invalid credential lookup: {0}")]
    InvalidInput(String),
}

/// Read access to the secrets of a namespace
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// List every secret visible in `namespace`, in the order the backend returns them
    async fn list_secrets(&self, namespace: &str) -> Result<Vec<StoredSecret>, LocatorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_output_redacts_credential() {
        let credential = Credential::from("hunter2");
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("7 bytes"));

        let encoded = EncodedCredential::new("aHVudGVyMg==".to_string());
        assert!(!format!("{encoded:?}").contains("aHVudGVyMg"));
    }

    #[test]
    fn test_stored_secret_debug_shows_keys_only() {
        let secret = StoredSecret::new("bootstrap-abc").with_data("token-secret", "XYZ");
        let rendered = format!("{secret:?}");
        assert!(rendered.contains("token-secret"));
        assert!(!rendered.contains("XYZ"));
    }

    #[test]
    fn test_empty_credential() {
        assert!(Credential::empty().is_empty());
        assert_eq!(Credential::empty().as_bytes(), b"");
    }
}
