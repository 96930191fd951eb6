//! Common test utilities for provisioning integration tests
//!
//! Builds the in-memory credential store and engine, and runs the provisioner
//! against them capturing the progress lines.

#![allow(dead_code)]

use k8s_secret::credential::{MemoryCredentialStore, StoredSecret};
use k8s_secret::engine::{MemoryEngine, StackIdentity};
use k8s_secret::{provision, Mode, ProvisionerConfig, RunReport};

/// A `kube-system` namespace holding one bootstrap token with `token`
pub fn bootstrap_store(token: &str) -> MemoryCredentialStore {
    MemoryCredentialStore::new().with_namespace(
        "kube-system",
        vec![
            StoredSecret::new("attachdetach-controller-token-x7k2q").with_data("token", "sa"),
            StoredSecret::new("bootstrap-token-abcdef")
                .with_data("token-id", "abcdef")
                .with_data("token-secret", token),
        ],
    )
}

pub fn default_identity() -> StackIdentity {
    StackIdentity::new("k8s-secret", "dev")
}

/// Result of one run plus everything it printed
#[derive(Debug)]
pub struct Run {
    pub report: RunReport,
    pub lines: Vec<String>,
}

impl Run {
    pub fn printed(&self, line: &str) -> bool {
        self.lines.iter().any(|l| l == line)
    }

    pub fn printed_prefix(&self, prefix: &str) -> bool {
        self.lines.iter().any(|l| l.starts_with(prefix))
    }
}

pub async fn run(
    config: &ProvisionerConfig,
    mode: Mode,
    store: &MemoryCredentialStore,
    engine: &MemoryEngine,
) -> Run {
    let mut out = Vec::new();
    let report = provision(config, mode, store, engine, &mut out).await;
    let lines = String::from_utf8_lossy(&out)
        .lines()
        .map(str::to_string)
        .collect();
    Run { report, lines }
}
