//! # Reconciliation Engines
//!
//! Abstract interface for the infrastructure-automation engine that owns stack
//! state, diffing and provider reconciliation.
//!
//! - [`pulumi::PulumiCliEngine`] drives the `pulumi` CLI (production)
//! - [`memory::MemoryEngine`] evaluates the graph against an in-memory cluster (tests)

pub mod memory;
pub mod pulumi;

use crate::config::WorkspaceConfig;
use crate::graph::{GraphError, ProgramOutputs, ResourceGraph};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use thiserror::Error;

pub use memory::MemoryEngine;
pub use pulumi::PulumiCliEngine;

/// Identity of a reconciliation workspace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackIdentity {
    pub project_name: String,
    pub stack_name: String,
}

impl StackIdentity {
    pub fn new(project_name: impl Into<String>, stack_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            stack_name: stack_name.into(),
        }
    }
}

impl From<&WorkspaceConfig> for StackIdentity {
    fn from(config: &WorkspaceConfig) -> Self {
        Self::new(config.project_name.clone(), config.stack_name.clone())
    }
}

impl fmt::Display for StackIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_name, self.stack_name)
    }
}

/// Per-resource outcome of an engine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    Create,
    Update,
    Same,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Same => "same",
            Self::Delete => "delete",
        }
    }

    /// Map an engine operation label (`create`, `update`, `same`, `delete`,
    /// `replace`, ...) to a change kind
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "create" => Some(Self::Create),
            "update" | "replace" | "create-replacement" => Some(Self::Update),
            "same" => Some(Self::Same),
            "delete" | "delete-replaced" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// What an engine operation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSummary {
    pub changes: BTreeMap<ChangeKind, u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl OperationSummary {
    pub fn count(&self, kind: ChangeKind) -> u64 {
        self.changes.get(&kind).copied().unwrap_or(0)
    }

    /// True if any resource was created, updated or deleted
    pub fn has_changes(&self) -> bool {
        self.changes
            .iter()
            .any(|(kind, count)| *kind != ChangeKind::Same && *count > 0)
    }
}

impl fmt::Display for OperationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .changes
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(kind, count)| format!("{}={}", kind.as_str(), count))
            .collect();
        if parts.is_empty() {
            write!(f, "no resources")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Result of an update: the summary plus the stack outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub summary: OperationSummary,
    pub outputs: ProgramOutputs,
}

/// Which engine operation an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Workspace,
    Refresh,
    Up,
    Destroy,
    Outputs,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Workspace => "workspace",
            Self::Refresh => "refresh",
            Self::Up => "up",
            Self::Destroy => "destroy",
            Self::Outputs => "outputs",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("pulumi executable not found: {0}")]
    BinaryNotFound(String),
    #[error("{operation} failed: {source}")]
    Io {
        operation: Operation,
        #[source]
        source: std::io::Error,
    },
    #[error("{operation} exited with {status}: {stderr}")]
    CommandFailed {
        operation: Operation,
        status: String,
        stderr: String,
    },
    #[error("failed to parse {operation} output: {message}")]
    Parse {
        operation: Operation,
        message: String,
    },
    #[error("program evaluation failed: {0}")]
    Graph(#[from] GraphError),
    #[error("{operation} rejected: {message}")]
    Rejected {
        operation: Operation,
        message: String,
    },
}

/// Automation engine: binds programs to persisted stacks
#[async_trait]
pub trait ReconciliationEngine: Send + Sync {
    type Stack: Stack;

    /// Select the stack for `identity`, creating it if absent, bound to `program`
    async fn upsert_stack(
        &self,
        identity: &StackIdentity,
        program: ResourceGraph,
    ) -> Result<Self::Stack, EngineError>;
}

/// A stack bound to a program
#[async_trait]
pub trait Stack: Send + Sync {
    /// Reconcile recorded state with the live cluster
    async fn refresh(&self) -> Result<OperationSummary, EngineError>;

    /// Create or update resources to match the program
    async fn up(&self) -> Result<UpdateResult, EngineError>;

    /// Delete every resource of the stack, writing progress to `progress` as it
    /// happens
    async fn destroy(
        &self,
        progress: &mut (dyn Write + Send),
    ) -> Result<OperationSummary, EngineError>;

    /// Current stack outputs
    async fn outputs(&self) -> Result<ProgramOutputs, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(pairs: &[(ChangeKind, u64)]) -> OperationSummary {
        let now = Utc::now();
        OperationSummary {
            changes: pairs.iter().copied().collect(),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_same_only_summary_has_no_changes() {
        assert!(!summary(&[(ChangeKind::Same, 3)]).has_changes());
        assert!(!summary(&[(ChangeKind::Create, 0), (ChangeKind::Same, 3)]).has_changes());
        assert!(summary(&[(ChangeKind::Update, 1), (ChangeKind::Same, 2)]).has_changes());
    }

    #[test]
    fn test_summary_display() {
        let s = summary(&[(ChangeKind::Create, 2), (ChangeKind::Same, 1), (ChangeKind::Delete, 0)]);
        assert_eq!(s.to_string(), "create=2, same=1");
        assert_eq!(summary(&[]).to_string(), "no resources");
    }

    #[test]
    fn test_change_kind_labels() {
        assert_eq!(ChangeKind::from_label("create"), Some(ChangeKind::Create));
        assert_eq!(ChangeKind::from_label("replace"), Some(ChangeKind::Update));
        assert_eq!(ChangeKind::from_label("delete"), Some(ChangeKind::Delete));
        assert_eq!(ChangeKind::from_label("read"), None);
    }

    #[test]
    fn test_stack_identity_from_workspace_config() {
        let config = WorkspaceConfig {
            project_name: "k8s-secret".to_string(),
            stack_name: "dev".to_string(),
        };
        let identity = StackIdentity::from(&config);
        assert_eq!(identity.to_string(), "k8s-secret/dev");
    }
}
