//! Error types for the backup engine.
//!
//! Every failure is fatal to the current unit of work (filesystem, then
//! source, then run). Nothing here is retried; the variants only exist so
//! callers can tell configuration mistakes apart from failed external calls.

use std::io;
use thiserror::Error;

/// Errors raised by the backup engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid session or pipeline configuration, detected before any process starts
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A source spec string could not be parsed
    #[error("invalid source '{spec}': {reason}")]
    InvalidSource { spec: String, reason: String },

    /// A snapshot full name is not of the form `dataset@label`
    #[error("invalid snapshot name '{0}'")]
    InvalidSnapshotName(String),

    /// A pipeline stage could not be started
    #[error("error starting command {stage} ({program}): {source}")]
    Spawn {
        stage: usize,
        program: String,
        #[source]
        source: io::Error,
    },

    /// An external command failed; `stage` is the first failing stage in start order
    #[error("error {operation}: {detail}")]
    Command {
        operation: String,
        stage: usize,
        detail: String,
    },

    /// No snapshot label is shared between a source and its target
    #[error("no matching snapshot found between {source_dataset} and {target_dataset}")]
    NoMatchingSnapshot {
        source_dataset: String,
        target_dataset: String,
    },

    /// The transfer size estimate was zero, missing or unparseable
    #[error("error estimating transfer size for {snapshot}: {reason}")]
    Estimate { snapshot: String, reason: String },

    /// A destroy call failed part way through retention cleanup
    #[error("error cleaning snapshots on {dataset} ({deleted} of {candidates} deleted): {source}")]
    Cleanup {
        dataset: String,
        deleted: usize,
        candidates: usize,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// True for errors that were raised before any external call was made.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::InvalidSource { .. } | Self::InvalidSnapshotName(_)
        )
    }

    /// Attach the operation name to a stage that could not be started.
    ///
    /// Other errors already carry their context and pass through unchanged.
    pub fn in_operation(self, operation: &str) -> Self {
        match self {
            Self::Spawn {
                stage,
                program,
                source,
            } => Self::Command {
                operation: operation.to_string(),
                stage,
                detail: format!("error starting command {} ({}): {}", stage, program, source),
            },
            other => other,
        }
    }

    /// The 0-based index of the failing pipeline stage, if this error came from one.
    pub fn failed_stage(&self) -> Option<usize> {
        match self {
            Self::Command { stage, .. } | Self::Spawn { stage, .. } => Some(*stage),
            Self::Cleanup { source, .. } => source.failed_stage(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_message_includes_operation() {
        let err = EngineError::Command {
            operation: "listing snapshots".to_string(),
            stage: 0,
            detail: "dataset does not exist".to_string(),
        };
        assert_eq!(err.to_string(), "error listing snapshots: dataset does not exist");
        assert_eq!(err.failed_stage(), Some(0));
        assert!(!err.is_config());
    }

    #[test]
    fn test_cleanup_error_exposes_inner_stage() {
        let inner = EngineError::Command {
            operation: "deleting snapshot".to_string(),
            stage: 0,
            detail: "busy".to_string(),
        };
        let err = EngineError::Cleanup {
            dataset: "pool/data".to_string(),
            deleted: 1,
            candidates: 3,
            source: Box::new(inner),
        };
        assert_eq!(err.failed_stage(), Some(0));
        assert!(err.to_string().contains("1 of 3 deleted"));
    }

    #[test]
    fn test_spawn_error_gains_operation_name() {
        let err = EngineError::Spawn {
            stage: 0,
            program: "ssh".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        }
        .in_operation("creating snapshot");

        assert_eq!(err.failed_stage(), Some(0));
        let msg = err.to_string();
        assert!(msg.starts_with("error creating snapshot: "), "got: {}", msg);
        assert!(msg.contains("(ssh)"));

        let untouched = EngineError::Config("empty".to_string()).in_operation("listing snapshots");
        assert!(untouched.is_config());
    }

    #[test]
    fn test_config_errors_are_classified() {
        assert!(EngineError::Config("empty".to_string()).is_config());
        assert!(EngineError::InvalidSnapshotName("x".to_string()).is_config());
    }
}
