//! Error types for the backup engine.

use std::path::PathBuf;
use thiserror::Error;

/// Session-fatal faults. These prevent any backup from proceeding and are
/// reported through the completion outcome as a `Failed` terminal state.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("destination root is not usable: {0}")]
    DestinationUnavailable(PathBuf),

    #[error("none of the requested source directories exist")]
    NoSourcesResolved,
}

/// Usage errors, rejected synchronously by `BackupSession::start` before any
/// I/O happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("a backup session is already running for this destination")]
    AlreadyRunning,

    #[error("no source directories configured")]
    NoSources,

    #[error("snapshot retention count must be at least 1")]
    InvalidRetention,
}

/// A single file (or directory) that could not be processed. Recorded and
/// skipped; never aborts the session.
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

impl FileFailure {
    pub fn new(path: impl Into<PathBuf>, error: impl ToString) -> Self {
        Self {
            path: path.into(),
            error: error.to_string(),
        }
    }
}

impl std::fmt::Display for FileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}
