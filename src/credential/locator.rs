//! # Credential Locator
//!
//! Finds the first secret whose name starts with a prefix and extracts one data
//! value from it.

use super::{Credential, CredentialStore, LocatorError, StoredSecret};
use crate::config::{MatchOrder, NotFoundPolicy, SourceConfig};
use tracing::{debug, info, warn};

/// Looks up a credential through a [`CredentialStore`]
#[derive(Debug)]
pub struct CredentialLocator<'a, S: ?Sized> {
    store: &'a S,
    not_found_policy: NotFoundPolicy,
    match_order: MatchOrder,
}

impl<'a, S> CredentialLocator<'a, S>
where
    S: CredentialStore + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            not_found_policy: NotFoundPolicy::default(),
            match_order: MatchOrder::default(),
        }
    }

    /// Locator configured with the policies of a [`SourceConfig`]
    pub fn for_source(store: &'a S, source: &SourceConfig) -> Self {
        Self::new(store)
            .with_not_found_policy(source.not_found_policy)
            .with_match_order(source.match_order)
    }

    pub fn with_not_found_policy(mut self, policy: NotFoundPolicy) -> Self {
        self.not_found_policy = policy;
        self
    }

    pub fn with_match_order(mut self, order: MatchOrder) -> Self {
        self.match_order = order;
        self
    }

    /// Return the `data_key` value of the first secret in `namespace` whose name
    /// starts with `name_prefix`.
    ///
    /// The listing is a single snapshot and is not retried. Under
    /// [`NotFoundPolicy::Empty`] a missing secret or data key yields an empty
    /// credential instead of an error.
    pub async fn locate(
        &self,
        namespace: &str,
        name_prefix: &str,
        data_key: &str,
    ) -> Result<Credential, LocatorError> {
        if namespace.trim().is_empty() {
            return Err(LocatorError::InvalidInput(
                "namespace must not be empty".to_string(),
            ));
        }

        let secrets = self.store.list_secrets(namespace).await?;
        debug!(
            "Listed {} secrets in namespace {}",
            secrets.len(),
            namespace
        );

        let Some(secret) = select_match(&secrets, name_prefix, self.match_order) else {
            return self.not_found(LocatorError::NotFound {
                namespace: namespace.to_string(),
                prefix: name_prefix.to_string(),
            });
        };

        match secret.data.get(data_key) {
            Some(value) => {
                info!(
                    "Found credential in secret {}/{} (key: {})",
                    namespace, secret.name, data_key
                );
                Ok(Credential::new(value.clone()))
            }
            None => self.not_found(LocatorError::MissingKey {
                namespace: namespace.to_string(),
                secret: secret.name.clone(),
                key: data_key.to_string(),
            }),
        }
    }

    fn not_found(&self, error: LocatorError) -> Result<Credential, LocatorError> {
        match self.not_found_policy {
            NotFoundPolicy::Fail => Err(error),
            NotFoundPolicy::Empty => {
                warn!("{}, continuing with an empty credential", error);
                Ok(Credential::empty())
            }
        }
    }
}

/// Pick the matching secret according to `order`
fn select_match<'s>(
    secrets: &'s [StoredSecret],
    name_prefix: &str,
    order: MatchOrder,
) -> Option<&'s StoredSecret> {
    let mut matches = secrets.iter().filter(|s| s.name.starts_with(name_prefix));
    match order {
        MatchOrder::Listing => matches.next(),
        MatchOrder::Lexicographic => matches.min_by(|a, b| a.name.cmp(&b.name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::MemoryCredentialStore;

    fn bootstrap_store() -> MemoryCredentialStore {
        MemoryCredentialStore::new().with_namespace(
            "kube-system",
            vec![
                StoredSecret::new("bootstrap-abc").with_data("token-secret", "XYZ"),
                StoredSecret::new("other").with_data("token-secret", "nope"),
            ],
        )
    }

    #[tokio::test]
    async fn test_locate_returns_first_prefix_match() {
        let store = bootstrap_store();
        let credential = CredentialLocator::new(&store)
            .locate("kube-system", "bootstrap-", "token-secret")
            .await
            .unwrap();
        assert_eq!(credential.as_bytes(), b"XYZ");
    }

    #[tokio::test]
    async fn test_locate_without_match_returns_empty() {
        let store = MemoryCredentialStore::new()
            .with_namespace("kube-system", vec![StoredSecret::new("other")]);
        let credential = CredentialLocator::new(&store)
            .locate("kube-system", "bootstrap-", "token-secret")
            .await
            .unwrap();
        assert!(credential.is_empty());
    }

    #[tokio::test]
    async fn test_locate_without_match_fails_under_fail_policy() {
        let store = MemoryCredentialStore::new()
            .with_namespace("kube-system", vec![StoredSecret::new("other")]);
        let err = CredentialLocator::new(&store)
            .with_not_found_policy(NotFoundPolicy::Fail)
            .locate("kube-system", "bootstrap-", "token-secret")
            .await
            .unwrap_err();
        assert!(matches!(err, LocatorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_locate_missing_key() {
        let store = MemoryCredentialStore::new().with_namespace(
            "kube-system",
            vec![StoredSecret::new("bootstrap-abc").with_data("other-key", "XYZ")],
        );

        let lenient = CredentialLocator::new(&store)
            .locate("kube-system", "bootstrap-", "token-secret")
            .await
            .unwrap();
        assert!(lenient.is_empty());

        let err = CredentialLocator::new(&store)
            .with_not_found_policy(NotFoundPolicy::Fail)
            .locate("kube-system", "bootstrap-", "token-secret")
            .await
            .unwrap_err();
        assert!(matches!(err, LocatorError::MissingKey { ref secret, .. } if secret == "bootstrap-abc"));
    }

    #[tokio::test]
    async fn test_prefix_match_is_case_sensitive() {
        let store = MemoryCredentialStore::new().with_namespace(
            "kube-system",
            vec![StoredSecret::new("Bootstrap-abc").with_data("token-secret", "XYZ")],
        );
        let credential = CredentialLocator::new(&store)
            .locate("kube-system", "bootstrap-", "token-secret")
            .await
            .unwrap();
        assert!(credential.is_empty());
    }

    #[tokio::test]
    async fn test_match_order() {
        let store = MemoryCredentialStore::new().with_namespace(
            "kube-system",
            vec![
                StoredSecret::new("bootstrap-zzz").with_data("token-secret", "late"),
                StoredSecret::new("bootstrap-aaa").with_data("token-secret", "early"),
            ],
        );

        let listing = CredentialLocator::new(&store)
            .locate("kube-system", "bootstrap-", "token-secret")
            .await
            .unwrap();
        assert_eq!(listing.as_bytes(), b"late");

        let sorted = CredentialLocator::new(&store)
            .with_match_order(MatchOrder::Lexicographic)
            .locate("kube-system", "bootstrap-", "token-secret")
            .await
            .unwrap();
        assert_eq!(sorted.as_bytes(), b"early");
    }

    #[tokio::test]
    async fn test_empty_namespace_is_rejected() {
        let store = bootstrap_store();
        let err = CredentialLocator::new(&store)
            .locate("", "bootstrap-", "token-secret")
            .await
            .unwrap_err();
        assert!(matches!(err, LocatorError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_transport_errors_propagate_regardless_of_policy() {
        let store = bootstrap_store().failing("connection refused");
        let err = CredentialLocator::new(&store)
            .locate("kube-system", "bootstrap-", "token-secret")
            .await
            .unwrap_err();
        assert!(matches!(err, LocatorError::Transport { .. }));
    }
}
