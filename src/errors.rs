//! Typed error hierarchy for the orchestrator.
//!
//! Four top-level enums cover the four failure domains:
//! - `SessionError`: process-level worker faults (spawn, timeout, I/O)
//! - `StateError`: persistent state load/save failures
//! - `PlanError`: plan document access and edit failures
//! - `CommitError`: commit collaborator failures
//!
//! Process-level faults never surface as outcome signals: a worker that
//! exits non-zero or never starts is a `SessionError`, not a verdict.

use thiserror::Error;

/// Errors from invoking an external worker session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to spawn worker process '{cmd}': {source}")]
    SpawnFailed {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write envelope to worker stdin: {0}")]
    StdinWriteFailed(#[source] std::io::Error),

    #[error("Worker session exceeded the {limit_secs}s timeout")]
    Timeout { limit_secs: u64 },

    #[error("Failed to read worker output stream: {0}")]
    StreamReadFailed(#[source] std::io::Error),

    #[error("Failed to write transcript at {path}: {source}")]
    TranscriptWriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the persistent state store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to read state file at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file at {path} is corrupt: {source}")]
    Corrupt {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write state file at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from plan document access and in-place edits.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to read plan document at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write plan document at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Task {id} not found in plan")]
    TaskNotFound { id: String },

    #[error("No status marker found for task {id}; cannot toggle in place")]
    MarkerNotFound { id: String },

    #[error("Plan parser rejected document: {0}")]
    ParseRejected(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the commit collaborator.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Not inside a git repository: {0}")]
    NoRepository(String),

    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),
}
