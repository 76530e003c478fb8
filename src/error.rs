use std::io;

use crate::supervisor::RunSummary;

/// Errors surfaced to whoever asked for the stress run.
#[derive(Debug, thiserror::Error)]
pub enum StressError {
    #[error("invalid {field}: {reason}")]
    InvalidRequest { field: &'static str, reason: String },
    #[error("failed run completed in {}s", .0.elapsed.as_secs())]
    RunFailed(RunSummary),
}

impl StressError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors that end a single worker. The supervisor only ever sees them as
/// a nonzero exit status.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("hogvm malloc of {bytes} bytes failed")]
    Allocation { bytes: u64 },
    #[error("memory corruption at offset {offset}")]
    Corruption { offset: usize },
    #[error("mkstemp failed: {0}")]
    Create(#[source] io::Error),
    #[error("unlink failed: {0}")]
    Unlink(#[source] io::Error),
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    #[error("hoghdd does not run in dry-run mode")]
    DryRunUnsupported,
}

impl WorkerError {
    pub fn exit_code(&self) -> i32 {
        1
    }
}
