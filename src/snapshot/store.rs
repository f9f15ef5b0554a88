//! Snapshot directory bookkeeping under a destination root.
//!
//! A snapshot is a directory named after its creation time,
//! `YYYYMMDD-HHMMSS`, so lexicographic order is chronological order. A
//! snapshot counts as complete only once a marker manifest exists at its
//! root; the marker is written after the last file lands, so an interrupted
//! run can never masquerade as a usable reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Marker manifest written into a snapshot once it is complete.
pub const COMPLETE_MARKER: &str = ".snapvault.json";

const SNAPSHOT_TIME_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Stats recorded in the completion marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub snapshot: String,
    pub created_at: DateTime<Utc>,
    pub files_linked: usize,
    pub files_copied: usize,
    pub bytes_copied: u64,
    pub failures: usize,
}

/// Access to the snapshots under one destination root.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// All snapshot directories, complete or not, ascending by name
    /// (= ascending by creation time).
    pub fn list_snapshots(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if is_snapshot_name(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Snapshots carrying a completion marker, ascending.
    pub fn list_complete(&self) -> io::Result<Vec<String>> {
        Ok(self
            .list_snapshots()?
            .into_iter()
            .filter(|name| self.is_complete(name))
            .collect())
    }

    pub fn is_complete(&self, name: &str) -> bool {
        self.path_of(name).join(COMPLETE_MARKER).is_file()
    }

    /// The newest complete snapshot, if any. Incomplete leftovers from
    /// cancelled or crashed runs are skipped, never deleted.
    pub fn latest_complete(&self) -> io::Result<Option<String>> {
        Ok(self.list_complete()?.pop())
    }

    /// Create the directory for a new snapshot and return its name.
    ///
    /// Runs within the same second get a numeric suffix chosen so that the
    /// names still sort chronologically.
    pub fn begin_snapshot(&self) -> io::Result<(String, PathBuf)> {
        let base = Utc::now().format(SNAPSHOT_TIME_FORMAT).to_string();
        let mut name = base.clone();
        let mut bump = 1u32;
        loop {
            let path = self.path_of(&name);
            match fs::create_dir(&path) {
                Ok(()) => return Ok((name, path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    bump += 1;
                    name = format!("{base}-{bump}");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write the completion marker. The temp-then-rename dance makes the
    /// marker's existence imply a fully written manifest.
    pub fn mark_complete(&self, name: &str, manifest: &SnapshotManifest) -> io::Result<()> {
        let dir = self.path_of(name);
        let tmp = dir.join(format!("{COMPLETE_MARKER}.tmp"));
        let json = serde_json::to_string_pretty(manifest).map_err(io::Error::other)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, dir.join(COMPLETE_MARKER))
    }
}

/// `YYYYMMDD-HHMMSS` with an optional `-N` disambiguation suffix.
fn is_snapshot_name(name: &str) -> bool {
    let b = name.as_bytes();
    if b.len() < 15 {
        return false;
    }
    let base_ok = b[..8].iter().all(u8::is_ascii_digit)
        && b[8] == b'-'
        && b[9..15].iter().all(u8::is_ascii_digit);
    if !base_ok {
        return false;
    }
    if b.len() == 15 {
        return true;
    }
    b[15] == b'-' && b.len() > 16 && b[16..].iter().all(u8::is_ascii_digit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest(name: &str) -> SnapshotManifest {
        SnapshotManifest {
            snapshot: name.to_string(),
            created_at: Utc::now(),
            files_linked: 0,
            files_copied: 0,
            bytes_copied: 0,
            failures: 0,
        }
    }

    #[test]
    fn test_snapshot_name_validation() {
        assert!(is_snapshot_name("20260807-101530"));
        assert!(is_snapshot_name("20260807-101530-2"));
        assert!(is_snapshot_name("20260807-101530-12"));
        assert!(!is_snapshot_name("20260807"));
        assert!(!is_snapshot_name("2026-08-07-101530"));
        assert!(!is_snapshot_name("20260807-101530-"));
        assert!(!is_snapshot_name("20260807-101530x"));
        assert!(!is_snapshot_name("lost+found"));
    }

    #[test]
    fn test_same_second_names_stay_unique_and_ordered() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());

        let (first, _) = store.begin_snapshot().unwrap();
        let (second, _) = store.begin_snapshot().unwrap();
        let (third, _) = store.begin_snapshot().unwrap();

        assert_ne!(first, second);
        assert_ne!(second, third);

        let listed = store.list_snapshots().unwrap();
        assert_eq!(listed, vec![first, second, third]);
    }

    #[test]
    fn test_suffix_sorts_before_next_second() {
        // A bumped name from second N must sort before the plain name of
        // second N+1, or retention would delete the wrong snapshot.
        let mut names = vec![
            "20260807-101531".to_string(),
            "20260807-101530-2".to_string(),
            "20260807-101530".to_string(),
        ];
        names.sort();
        assert_eq!(
            names,
            vec!["20260807-101530", "20260807-101530-2", "20260807-101531"]
        );
    }

    #[test]
    fn test_latest_complete_skips_unmarked() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());

        let (old, _) = store.begin_snapshot().unwrap();
        store.mark_complete(&old, &manifest(&old)).unwrap();
        let (interrupted, _) = store.begin_snapshot().unwrap();

        assert!(store.is_complete(&old));
        assert!(!store.is_complete(&interrupted));
        assert_eq!(store.latest_complete().unwrap(), Some(old));
    }

    #[test]
    fn test_latest_complete_empty_root() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert_eq!(store.latest_complete().unwrap(), None);
    }

    #[test]
    fn test_foreign_directories_ignored() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("not-a-snapshot")).unwrap();
        fs::write(dir.path().join("stray.txt"), b"x").unwrap();

        let store = SnapshotStore::new(dir.path());
        assert!(store.list_snapshots().unwrap().is_empty());
    }

    #[test]
    fn test_marker_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let (name, path) = store.begin_snapshot().unwrap();

        let mut m = manifest(&name);
        m.files_copied = 7;
        m.bytes_copied = 1234;
        store.mark_complete(&name, &m).unwrap();

        let raw = fs::read_to_string(path.join(COMPLETE_MARKER)).unwrap();
        let parsed: SnapshotManifest = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.snapshot, name);
        assert_eq!(parsed.files_copied, 7);
        assert_eq!(parsed.bytes_copied, 1234);
    }
}
