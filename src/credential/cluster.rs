//! # Cluster Credential Store
//!
//! Lists secrets from the live cluster through the Kubernetes API.

use super::{CredentialStore, LocatorError, StoredSecret};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, ListParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use std::path::Path;
use tracing::debug;

/// [`CredentialStore`] backed by a kube [`Client`]
#[derive(Clone)]
pub struct KubeCredentialStore {
    client: Client,
}

impl std::fmt::Debug for KubeCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCredentialStore").finish_non_exhaustive()
    }
}

impl KubeCredentialStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the kubeconfig at `path` (current context)
    pub async fn from_kubeconfig(path: &Path) -> Result<Self, LocatorError> {
        let transport = |message: String| LocatorError::Transport {
            namespace: String::new(),
            message,
        };

        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
            transport(format!(
                "failed to read kubeconfig {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| transport(format!("failed to load kubeconfig: {e}")))?;
        let client = Client::try_from(config)
            .map_err(|e| transport(format!("failed to create Kubernetes client: {e}")))?;

        debug!("Created Kubernetes client from {}", path.display());
        Ok(Self::new(client))
    }
}

#[async_trait]
impl CredentialStore for KubeCredentialStore {
    async fn list_secrets(&self, namespace: &str) -> Result<Vec<StoredSecret>, LocatorError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let list = secrets
            .list(&ListParams::default())
            .await
            .map_err(|e| LocatorError::Transport {
                namespace: namespace.to_string(),
                message: e.to_string(),
            })?;

        Ok(list.items.into_iter().map(stored_secret).collect())
    }
}

/// Convert an API secret; `data` values are already base64-decoded by the client
fn stored_secret(secret: Secret) -> StoredSecret {
    StoredSecret {
        name: secret.metadata.name.unwrap_or_default(),
        data: secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect(),
    }
}
