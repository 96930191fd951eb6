//! # Configuration
//!
//! Provisioner configuration and the policies that govern its edge cases.
//!
//! Every component receives its settings from [`ProvisionerConfig`]; nothing reads
//! the fixed identifiers from global state.

pub mod policy;
pub mod provisioner;

pub use policy::{DestroyErrorPolicy, MatchOrder, NotFoundPolicy, ParsePolicyError};
pub use provisioner::{
    default_kubeconfig, InvalidSetting, ProvisionerConfig, PulumiConfig, SourceConfig, TargetConfig,
    WorkspaceConfig,
};
