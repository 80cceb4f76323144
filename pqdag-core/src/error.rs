//! Error types for PQDAG control
//!
//! Taxonomy covering pipeline stages, remote lifecycle operations,
//! node fan-out and the local plumbing underneath them.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for all control-plane operations
#[derive(Debug, Error)]
pub enum PqdagError {
    // ========== Pipeline Errors ==========

    /// A pipeline stage exited non-zero; aborts the whole pipeline
    #[error("Stage {stage} failed with exit code {exit_code}: {output}")]
    StageFailed {
        stage: &'static str,
        exit_code: i32,
        output: String,
    },

    /// An artifact required by a later entry point is not on disk
    #[error("Missing artifact {}: run allocation first", path.display())]
    MissingArtifact { path: PathBuf },

    /// Another pipeline already holds the dataset
    #[error("A pipeline is already running for dataset {dataset}")]
    PipelineBusy { dataset: String },

    // ========== Cluster Errors ==========

    /// Lifecycle operation returned an unexpected exit code
    #[error("{operation} failed with exit code {exit_code}")]
    RemoteOpFailed {
        operation: &'static str,
        exit_code: i32,
        output: String,
    },

    /// Some nodes of a fan-out did not succeed
    #[error("Fan-out succeeded on {succeeded}/{total} nodes")]
    PartialFanOut { succeeded: usize, total: usize },

    // ========== Execution Errors ==========

    /// The command could not be launched at all
    #[error("Failed to launch command on {target}: {reason}")]
    Spawn { target: String, reason: String },

    /// The command outlived its deadline and was killed
    #[error("Command on {target} timed out after {timeout_secs}s")]
    CommandTimeout { target: String, timeout_secs: u64 },

    // ========== Request / Config Errors ==========

    /// Caller supplied a value that cannot be used safely
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Configuration could not be loaded
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// Local filesystem failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PqdagError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PqdagError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if trying the same command again could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PqdagError::Spawn { .. }
                | PqdagError::CommandTimeout { .. }
                | PqdagError::PipelineBusy { .. }
        )
    }

    /// Captured command output carried by the error, if any
    pub fn output(&self) -> Option<&str> {
        match self {
            PqdagError::StageFailed { output, .. } | PqdagError::RemoteOpFailed { output, .. } => {
                Some(output.as_str())
            }
            _ => None,
        }
    }
}

/// Result type alias for control-plane operations
pub type Result<T> = std::result::Result<T, PqdagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_failure_carries_output() {
        let err = PqdagError::StageFailed {
            stage: "statistics",
            exit_code: 2,
            output: "mpiexec: not found".into(),
        };
        assert_eq!(err.output(), Some("mpiexec: not found"));
        assert!(err.to_string().contains("statistics"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn timeouts_are_retryable() {
        let err = PqdagError::CommandTimeout {
            target: "ubuntu@10.0.0.2".into(),
            timeout_secs: 30,
        };
        assert!(err.is_retryable());
        assert_eq!(err.output(), None);
    }
}
