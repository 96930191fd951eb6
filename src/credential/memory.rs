//! In-memory [`CredentialStore`] used by tests and local dry runs.

use super::{CredentialStore, LocatorError, StoredSecret};
use async_trait::async_trait;
use std::collections::HashMap;

/// Fixed set of secrets per namespace, listed in insertion order
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    namespaces: HashMap<String, Vec<StoredSecret>>,
    failure: Option<String>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: &str, secrets: Vec<StoredSecret>) -> Self {
        self.namespaces.insert(namespace.to_string(), secrets);
        self
    }

    /// Make every listing fail with a transport error carrying `message`
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn list_secrets(&self, namespace: &str) -> Result<Vec<StoredSecret>, LocatorError> {
        if let Some(message) = &self.failure {
            return Err(LocatorError::Transport {
                namespace: namespace.to_string(),
                message: message.clone(),
            });
        }
        Ok(self.namespaces.get(namespace).cloned().unwrap_or_default())
    }
}
