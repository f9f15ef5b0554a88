//! Snapvault Library
//!
//! Incremental backup engine: each run writes a timestamped snapshot in
//! which unchanged files are hardlinks into the previous complete snapshot
//! and changed or new files are fresh copies.

pub mod config;
pub mod executor;
pub mod filter;
pub mod fs;
pub mod progress;
pub mod session;
pub mod snapshot;
pub mod utils;

// Re-export commonly used types
pub use config::{BackupRequest, EngineOptions};
pub use progress::ProgressSnapshot;
pub use session::{BackupSession, CompletionOutcome, SessionState, TerminalState};
pub use utils::errors::{EngineError, FileFailure, StartError};
pub type Result<T> = std::result::Result<T, EngineError>;
