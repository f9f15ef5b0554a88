//! Backup session lifecycle.
//!
//! One `BackupSession` drives exactly one run: `Idle → Running →
//! {Completed, Cancelled, Failed}`. The caller's thread only starts and
//! cancels; a background worker performs every filesystem operation,
//! publishes immutable progress snapshots through a watch channel, and
//! delivers exactly one completion value. At most one session may run
//! against a given destination root at a time, enforced here rather than
//! left to filesystem races.

use crate::config::BackupRequest;
use crate::executor::Replicator;
use crate::filter::PathFilter;
use crate::fs::link::StdLinkBackend;
use crate::progress::{ProgressPublisher, ProgressSnapshot};
use crate::snapshot::prune::prune;
use crate::snapshot::store::{SnapshotManifest, SnapshotStore, COMPLETE_MARKER};
use crate::utils::errors::{EngineError, FileFailure, StartError};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Observable lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalState {
    /// Every resolved source was fully walked. Individual file failures do
    /// not demote this; they ride along in the failure list.
    Completed,
    /// Cancellation was observed at a file boundary; the snapshot is left
    /// on disk but never marked complete.
    Cancelled,
    /// Nothing could be backed up at all.
    Failed(String),
}

/// Aggregate counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub files_linked: usize,
    pub files_copied: usize,
    pub bytes_copied: u64,
    pub snapshots_pruned: usize,
}

/// Delivered exactly once per `start`.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub state: TerminalState,
    /// Name of the snapshot directory this run produced; absent when the
    /// run failed before the directory was created.
    pub snapshot: Option<String>,
    pub failures: Vec<FileFailure>,
    pub stats: RunStats,
}

impl CompletionOutcome {
    fn failed(reason: impl ToString) -> Self {
        Self {
            state: TerminalState::Failed(reason.to_string()),
            snapshot: None,
            failures: Vec::new(),
            stats: RunStats::default(),
        }
    }
}

/// Resolves when the session reaches a terminal state.
pub struct CompletionHandle {
    rx: oneshot::Receiver<CompletionOutcome>,
}

impl CompletionHandle {
    pub async fn wait(self) -> CompletionOutcome {
        self.rx
            .await
            .unwrap_or_else(|_| CompletionOutcome::failed("backup worker dropped"))
    }
}

// Destination roots with a session currently running against them.
static ACTIVE_DESTINATIONS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive claim on a destination root, held for the lifetime of one run.
struct DestinationClaim {
    key: PathBuf,
}

fn claim_destination(root: &Path) -> Option<DestinationClaim> {
    let key = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let mut active = lock(&ACTIVE_DESTINATIONS);
    if active.contains(&key) {
        return None;
    }
    active.push(key.clone());
    Some(DestinationClaim { key })
}

impl Drop for DestinationClaim {
    fn drop(&mut self) {
        lock(&ACTIVE_DESTINATIONS).retain(|key| key != &self.key);
    }
}

/// One backup run and its caller-facing controls.
pub struct BackupSession {
    id: Uuid,
    state: Arc<Mutex<SessionState>>,
    cancel: CancellationToken,
    progress_tx: watch::Sender<ProgressSnapshot>,
}

impl BackupSession {
    pub fn new() -> Self {
        let (progress_tx, _) = watch::channel(ProgressSnapshot::default());
        Self {
            id: Uuid::new_v4(),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            cancel: CancellationToken::new(),
            progress_tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Subscribe to progress snapshots. Safe to call before or during a
    /// run; observers only ever receive cloned values.
    pub fn progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress_tx.subscribe()
    }

    /// Request cancellation. Advisory: the worker stops at the next file
    /// boundary. A no-op unless the session is running.
    pub fn cancel(&self) {
        if self.state() == SessionState::Running {
            info!(session = %self.id, "cancellation requested");
            self.cancel.cancel();
        }
    }

    /// Start the backup. Must be called from within a tokio runtime.
    ///
    /// Usage errors are rejected synchronously, before any I/O: an empty
    /// source list, a zero retention count, a session that is not idle, or
    /// another session already running against the same destination root.
    pub fn start(&self, request: BackupRequest) -> Result<CompletionHandle, StartError> {
        if request.sources.is_empty() {
            return Err(StartError::NoSources);
        }
        if request.max_snapshots == 0 {
            return Err(StartError::InvalidRetention);
        }

        let claim = {
            let mut state = lock(&self.state);
            if *state != SessionState::Idle {
                return Err(StartError::AlreadyRunning);
            }
            let Some(claim) = claim_destination(&request.destination_root) else {
                return Err(StartError::AlreadyRunning);
            };
            *state = SessionState::Running;
            claim
        };

        let (done_tx, done_rx) = oneshot::channel();
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let progress_tx = self.progress_tx.clone();
        let id = self.id;

        tokio::spawn(async move {
            let result =
                tokio::task::spawn_blocking(move || run_backup(id, request, progress_tx, cancel))
                    .await;
            let outcome = result.unwrap_or_else(|e| {
                CompletionOutcome::failed(format!("backup worker failed: {e}"))
            });

            *lock(&state) = match &outcome.state {
                TerminalState::Completed => SessionState::Completed,
                TerminalState::Cancelled => SessionState::Cancelled,
                TerminalState::Failed(_) => SessionState::Failed,
            };
            // Release the destination before completion is observable, so a
            // caller reacting to the outcome can start the next run at once.
            drop(claim);
            let _ = done_tx.send(outcome);
        });

        Ok(CompletionHandle { rx: done_rx })
    }
}

impl Default for BackupSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Map the ordered source list to the subdirectory keys they mirror under.
///
/// The key is the source's final path component; duplicates in the request
/// get `-2`, `-3`, … so each occurrence mirrors independently while staying
/// deterministic run to run. Missing sources become failures and the run
/// continues with the rest.
fn resolve_sources(sources: &[PathBuf]) -> (Vec<(String, PathBuf)>, Vec<FileFailure>) {
    let mut resolved = Vec::new();
    let mut failures = Vec::new();
    let mut seen: HashMap<String, u32> = HashMap::new();

    for source in sources {
        if !source.is_dir() {
            failures.push(FileFailure::new(source, "source directory does not exist"));
            continue;
        }
        let base = source
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "root".to_string());
        let count = seen.entry(base.clone()).or_insert(0);
        *count += 1;
        let key = if *count == 1 {
            base
        } else {
            format!("{base}-{count}")
        };
        resolved.push((key, source.clone()));
    }

    (resolved, failures)
}

/// The whole run, executed on the blocking worker.
fn run_backup(
    session: Uuid,
    request: BackupRequest,
    progress_tx: watch::Sender<ProgressSnapshot>,
    cancel: CancellationToken,
) -> CompletionOutcome {
    // Preflight: everything that makes a backup impossible is detected
    // here, before a snapshot directory exists, so a failed session never
    // leaves anything dangling.
    if !request.destination_root.is_dir() {
        return CompletionOutcome::failed(EngineError::DestinationUnavailable(
            request.destination_root.clone(),
        ));
    }

    let (sources, mut failures) = resolve_sources(&request.sources);
    if sources.is_empty() {
        return CompletionOutcome::failed(EngineError::NoSourcesResolved);
    }

    let store = SnapshotStore::new(&request.destination_root);
    let previous = match store.latest_complete() {
        Ok(previous) => previous,
        Err(e) => return CompletionOutcome::failed(EngineError::Io(e)),
    };

    let (name, snapshot_root) = match store.begin_snapshot() {
        Ok(created) => created,
        Err(e) => {
            return CompletionOutcome::failed(format!(
                "{}: {e}",
                EngineError::DestinationUnavailable(request.destination_root.clone())
            ))
        }
    };

    info!(
        session = %session,
        snapshot = %name,
        previous = previous.as_deref().unwrap_or("none"),
        sources = sources.len(),
        "backup run started"
    );

    let filter = PathFilter::new(request.excludes.clone());
    let backend = StdLinkBackend;
    let mut progress = ProgressPublisher::new(progress_tx);
    let replicator = Replicator::new(&backend, &request.options, &cancel);
    let previous_root = previous.as_deref().map(|prev| store.path_of(prev));

    let replication = replicator.replicate(
        &sources,
        &snapshot_root,
        previous_root.as_deref(),
        &filter,
        &mut progress,
    );

    failures.extend(replication.failures);
    let mut stats = RunStats {
        files_linked: replication.files_linked,
        files_copied: replication.files_copied,
        bytes_copied: replication.bytes_copied,
        snapshots_pruned: 0,
    };

    if replication.cancelled {
        info!(session = %session, snapshot = %name, "backup cancelled, snapshot left incomplete");
        return CompletionOutcome {
            state: TerminalState::Cancelled,
            snapshot: Some(name),
            failures,
            stats,
        };
    }

    let manifest = SnapshotManifest {
        snapshot: name.clone(),
        created_at: Utc::now(),
        files_linked: stats.files_linked,
        files_copied: stats.files_copied,
        bytes_copied: stats.bytes_copied,
        failures: failures.len(),
    };

    match store.mark_complete(&name, &manifest) {
        Ok(()) => {
            // Retention runs only once the new snapshot is a committed
            // reference; a cancelled or failed run never prunes.
            let pruned = prune(&store, request.max_snapshots);
            stats.snapshots_pruned = pruned.removed.len();
            failures.extend(pruned.failures);
        }
        Err(e) => {
            warn!(session = %session, snapshot = %name, error = %e,
                "could not write completion marker; snapshot will not serve as a reference");
            failures.push(FileFailure::new(snapshot_root.join(COMPLETE_MARKER), &e));
        }
    }

    info!(
        session = %session,
        snapshot = %name,
        linked = stats.files_linked,
        copied = stats.files_copied,
        bytes = stats.bytes_copied,
        failures = failures.len(),
        pruned = stats.snapshots_pruned,
        "backup run finished"
    );

    CompletionOutcome {
        state: TerminalState::Completed,
        snapshot: Some(name),
        failures,
        stats,
    }
}
