//! # Constants
//!
//! Shared defaults used throughout the provisioner.
//!
//! These values reproduce the fixed identifiers of a stock installation and can be
//! overridden via configuration (see [`crate::config::ProvisionerConfig`]).

/// Default Pulumi project name for the reconciliation workspace
pub const DEFAULT_PROJECT_NAME: &str = "k8s-secret";

/// Default Pulumi stack name for the reconciliation workspace
pub const DEFAULT_STACK_NAME: &str = "dev";

/// Namespace holding the bootstrap secret
pub const DEFAULT_SOURCE_NAMESPACE: &str = "kube-system";

/// Name prefix of the bootstrap secret
pub const DEFAULT_SOURCE_NAME_PREFIX: &str = "bootstrap-";

/// Data key read from the bootstrap secret
pub const DEFAULT_SOURCE_DATA_KEY: &str = "token-secret";

/// Name of the namespace created by the stack
pub const DEFAULT_TARGET_NAMESPACE: &str = "mynamespace";

/// Logical name of the secret resource created by the stack
pub const DEFAULT_TARGET_SECRET_RESOURCE: &str = "mysecret";

/// Data key of the secret created by the stack
pub const DEFAULT_TARGET_DATA_KEY: &str = "mysecret";

/// Logical name of the Kubernetes provider binding
pub const DEFAULT_PROVIDER_RESOURCE: &str = "k8s-provider";

/// Kubernetes secret type of the created secret
pub const SECRET_TYPE_OPAQUE: &str = "Opaque";

/// Stack output carrying the created secret's name
pub const EXPORT_SECRET_NAME: &str = "secretName";

/// Stack output carrying the created namespace's name
pub const EXPORT_NAMESPACE: &str = "namespace";

/// CLI token that selects destroy mode (exact, case-sensitive match)
pub const DESTROY_MODE_TOKEN: &str = "destroy";

/// Pulumi executable name looked up on `PATH`
pub const PULUMI_BINARY_NAME: &str = "pulumi";

/// Directory (relative to the home directory) holding Pulumi project workspaces
pub const DEFAULT_WORK_DIR: &str = ".k8s-secret/workspaces";

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "K8S_SECRET_";
