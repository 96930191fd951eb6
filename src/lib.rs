//! # k8s-secret
//!
//! Provisions a namespaced Kubernetes secret from the cluster's bootstrap token.
//!
//! ## Overview
//!
//! One run of the binary:
//!
//! 1. **Locates the credential** - the first secret in `kube-system` whose name starts
//!    with `bootstrap-`, data key `token-secret`
//! 2. **Encodes it** - standard base64, as the `Secret.data` schema requires
//! 3. **Builds the program** - a Kubernetes provider binding, the `mynamespace`
//!    namespace, and an `Opaque` secret in it carrying the encoded credential
//! 4. **Runs the stack lifecycle** - refresh, then either update or (with the
//!    `destroy` argument) destroy the `k8s-secret/dev` stack
//!
//! The engine and the credential source sit behind the
//! [`engine::ReconciliationEngine`] and [`credential::CredentialStore`] traits.
//! Production uses the `pulumi` CLI and the kube client; tests use the in-memory
//! implementations.

pub mod cli;
pub mod config;
pub mod constants;
pub mod credential;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod observability;
pub mod provisioner;

pub use config::ProvisionerConfig;
pub use error::ProvisionError;
pub use lifecycle::{LifecycleState, Mode};
pub use provisioner::{provision, RunReport};
