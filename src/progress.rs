//! Progress reporting for a running backup session.
//!
//! The worker owns the mutable counters and publishes immutable snapshots
//! through a watch channel; observers only ever see cloned values.

use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Point-in-time view of a running session's progress.
///
/// Counters are monotonically non-decreasing for the lifetime of one
/// session. Totals are best-effort, established by the pre-walk scan.
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    /// Number of files discovered by the scan phase.
    pub files_total: usize,

    /// Sum of the sizes of all discovered files.
    pub bytes_total: u64,

    /// Files successfully materialized so far.
    pub files_processed: usize,

    /// Bytes successfully materialized so far (linked or copied).
    pub bytes_processed: u64,

    /// File currently being processed, if any.
    pub current_path: Option<PathBuf>,
}

/// Worker-side handle that owns the counters and pushes snapshots.
pub struct ProgressPublisher {
    tx: watch::Sender<ProgressSnapshot>,
    state: ProgressSnapshot,
}

impl ProgressPublisher {
    pub fn new(tx: watch::Sender<ProgressSnapshot>) -> Self {
        Self {
            tx,
            state: ProgressSnapshot::default(),
        }
    }

    /// Record the totals established by the scan phase.
    pub fn set_totals(&mut self, files: usize, bytes: u64) {
        self.state.files_total = files;
        self.state.bytes_total = bytes;
        self.publish();
    }

    /// Mark `path` as the file currently being processed.
    pub fn start_file(&mut self, path: &Path) {
        self.state.current_path = Some(path.to_path_buf());
        self.publish();
    }

    /// Record a successful materialization of `bytes`.
    pub fn finish_file(&mut self, bytes: u64) {
        self.state.files_processed += 1;
        self.state.bytes_processed += bytes;
        self.publish();
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.clone()
    }

    fn publish(&self) {
        // Receivers may all be gone (headless run); that is fine.
        let _ = self.tx.send(self.state.clone());
    }
}
