//! Custom error types for the backup runner.

use thiserror::Error;

/// Failures from a single backup engine invocation
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with status {code}")]
    ExitStatus { command: &'static str, code: i32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Exit code to propagate when this failure aborts the pipeline.
    /// A child's non-zero status is passed through; everything else maps
    /// to a generic failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::ExitStatus { code, .. } => {
                u8::try_from(*code).ok().filter(|c| *c != 0).unwrap_or(1)
            }
            _ => 1,
        }
    }
}

/// Pipeline-level failures, one per step plus cancellation
#[derive(Error, Debug)]
pub enum JobError {
    #[error("repository unlock failed: {0}")]
    UnlockFailed(EngineError),

    #[error("backup step failed: {0}")]
    BackupFailed(EngineError),

    #[error("prune step failed: {0}")]
    PruneFailed(EngineError),

    #[error("run cancelled by operator")]
    CancelledByOperator,

    #[error("another backup run is already in progress")]
    AlreadyRunning,
}

impl JobError {
    /// Name of the failing step, for the final status line
    pub fn step(&self) -> Option<&'static str> {
        match self {
            JobError::UnlockFailed(_) => Some("unlock"),
            JobError::BackupFailed(_) => Some("backup"),
            JobError::PruneFailed(_) => Some("prune"),
            JobError::CancelledByOperator | JobError::AlreadyRunning => None,
        }
    }

    /// Process exit code, propagated from the failing step where one exists
    pub fn exit_code(&self) -> u8 {
        match self {
            JobError::UnlockFailed(e) | JobError::BackupFailed(e) | JobError::PruneFailed(e) => {
                e.exit_code()
            }
            // Same code the shell reports for an interrupted foreground job
            JobError::CancelledByOperator => 130,
            JobError::AlreadyRunning => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_propagates_child_status() {
        let err = JobError::BackupFailed(EngineError::ExitStatus {
            command: "backup",
            code: 3,
        });
        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.step(), Some("backup"));
    }

    #[test]
    fn test_exit_code_out_of_range_status() {
        let err = JobError::PruneFailed(EngineError::ExitStatus {
            command: "forget",
            code: -1,
        });
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_cancellation_exit_code() {
        assert_eq!(JobError::CancelledByOperator.exit_code(), 130);
        assert_eq!(JobError::CancelledByOperator.step(), None);
    }
}
