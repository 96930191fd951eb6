//! Run-level errors. Each variant names the phase that failed.

use crate::credential::LocatorError;
use crate::engine::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("problem getting secret: {0}")]
    Credential(#[source] LocatorError),
    #[error("Failed to set up a workspace: {0}")]
    WorkspaceSetup(#[source] EngineError),
    #[error("Failed to refresh stack: {0}")]
    Refresh(#[source] EngineError),
    #[error("Failed to update stack: {0}")]
    Apply(#[source] EngineError),
    #[error("Failed to destroy stack: {0}")]
    Destroy(#[source] EngineError),
}

impl ProvisionError {
    /// Metric/log label of the failed phase
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Credential(_) => "credential",
            Self::WorkspaceSetup(_) => "workspace",
            Self::Refresh(_) => "refresh",
            Self::Apply(_) => "update",
            Self::Destroy(_) => "destroy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Operation;

    #[test]
    fn test_messages_match_progress_lines() {
        let err = ProvisionError::Refresh(EngineError::Rejected {
            operation: Operation::Refresh,
            message: "boom".to_string(),
        });
        assert_eq!(err.to_string(), "Failed to refresh stack: refresh rejected: boom");
        assert_eq!(err.phase(), "refresh");

        let err = ProvisionError::Credential(LocatorError::InvalidInput(
            "namespace must not be empty".to_string(),
        ));
        assert!(err.to_string().starts_with("problem getting secret: "));
    }
}
