//! Retention: drop the oldest complete snapshots beyond the configured
//! limit.
//!
//! Runs only after the current snapshot is marked complete. Deleting an old
//! snapshot never breaks a newer one that hardlinks into it: the directory
//! entry goes away, the shared inodes survive as long as any link remains.

use crate::snapshot::store::SnapshotStore;
use crate::utils::errors::FileFailure;
use std::fs;
use tracing::{info, warn};

/// What pruning did, and what it could not do.
#[derive(Debug, Default)]
pub struct PruneReport {
    pub removed: Vec<String>,
    pub failures: Vec<FileFailure>,
}

/// Delete the oldest complete snapshots until at most `max_snapshots`
/// remain. Incomplete snapshots are invisible here: not counted, not
/// deleted. Failures are reported but never fatal; a stuck old snapshot
/// must not undo the backup that just succeeded.
pub fn prune(store: &SnapshotStore, max_snapshots: usize) -> PruneReport {
    let mut report = PruneReport::default();

    let complete = match store.list_complete() {
        Ok(list) => list,
        Err(e) => {
            warn!(root = %store.root().display(), error = %e, "could not list snapshots for pruning");
            report.failures.push(FileFailure::new(store.root(), &e));
            return report;
        }
    };

    if complete.len() <= max_snapshots {
        return report;
    }

    let excess = complete.len() - max_snapshots;
    for name in &complete[..excess] {
        let path = store.path_of(name);
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(snapshot = %name, "pruned old snapshot");
                report.removed.push(name.clone());
            }
            Err(e) => {
                warn!(snapshot = %name, error = %e, "failed to prune snapshot");
                report.failures.push(FileFailure::new(path, &e));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::store::SnapshotManifest;
    use chrono::Utc;
    use tempfile::TempDir;

    fn complete_snapshot(store: &SnapshotStore) -> String {
        let (name, _) = store.begin_snapshot().unwrap();
        let manifest = SnapshotManifest {
            snapshot: name.clone(),
            created_at: Utc::now(),
            files_linked: 0,
            files_copied: 0,
            bytes_copied: 0,
            failures: 0,
        };
        store.mark_complete(&name, &manifest).unwrap();
        name
    }

    #[test]
    fn test_keeps_newest_n() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());

        let names: Vec<String> = (0..5).map(|_| complete_snapshot(&store)).collect();

        let report = prune(&store, 2);
        assert_eq!(report.removed, names[..3].to_vec());
        assert!(report.failures.is_empty());
        assert_eq!(store.list_complete().unwrap(), names[3..].to_vec());
    }

    #[test]
    fn test_under_limit_is_untouched() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());

        complete_snapshot(&store);
        complete_snapshot(&store);

        let report = prune(&store, 5);
        assert!(report.removed.is_empty());
        assert_eq!(store.list_complete().unwrap().len(), 2);
    }

    #[test]
    fn test_incomplete_snapshots_are_invisible() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());

        let complete = complete_snapshot(&store);
        // Two interrupted runs, no markers.
        let (partial_a, _) = store.begin_snapshot().unwrap();
        let (partial_b, _) = store.begin_snapshot().unwrap();

        let report = prune(&store, 1);
        assert!(report.removed.is_empty());
        assert!(store.is_complete(&complete));
        assert!(store.path_of(&partial_a).exists());
        assert!(store.path_of(&partial_b).exists());
    }

    #[test]
    fn test_pruned_snapshot_leaves_hardlinked_data_intact() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());

        let old = complete_snapshot(&store);
        let old_file = store.path_of(&old).join("data.bin");
        fs::write(&old_file, b"shared bytes").unwrap();

        let newer = complete_snapshot(&store);
        let newer_file = store.path_of(&newer).join("data.bin");
        fs::hard_link(&old_file, &newer_file).unwrap();

        let report = prune(&store, 1);
        assert_eq!(report.removed, vec![old]);
        assert_eq!(fs::read(&newer_file).unwrap(), b"shared bytes");
    }
}
