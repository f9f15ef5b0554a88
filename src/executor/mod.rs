//! Replication of source trees into a snapshot.
//!
//! One pass per run: scan every source for files and totals, then walk the
//! collected list in order, deciding link-vs-copy per file against the
//! previous complete snapshot. Cancellation is observed between files,
//! never mid-file; per-file trouble is recorded and skipped so one bad file
//! cannot sink an otherwise good snapshot.

use crate::config::EngineOptions;
use crate::filter::PathFilter;
use crate::fs::link::{self, LinkBackend};
use crate::fs::metadata::FileMeta;
use crate::fs::walker::{scan_source, SourceFile};
use crate::progress::ProgressPublisher;
use crate::snapshot::compare::{compare, ComparisonOutcome};
use crate::utils::errors::FileFailure;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Aggregate result of one replication pass.
#[derive(Debug, Default)]
pub struct ReplicationOutcome {
    pub files_linked: usize,
    pub files_copied: usize,
    pub bytes_copied: u64,
    pub failures: Vec<FileFailure>,
    pub cancelled: bool,
}

/// How a single file landed in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    Linked,
    Copied(u64),
}

/// Put one file into the snapshot at `dest`.
///
/// `Unchanged` tries a verified hardlink to the previous snapshot first and
/// degrades to a copy if the link keeps failing; everything else is a copy
/// from the source. Parent directories are created on demand.
pub fn materialize(
    backend: &dyn LinkBackend,
    options: &EngineOptions,
    file: &SourceFile,
    dest: &Path,
    previous_file: Option<&Path>,
    outcome: ComparisonOutcome,
) -> Result<Materialized, FileFailure> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| FileFailure::new(&file.path, &e))?;
    }

    if let (ComparisonOutcome::Unchanged, Some(previous)) = (outcome, previous_file) {
        match link::link_verified(backend, previous, dest, options.link_retries) {
            Ok(()) => return Ok(Materialized::Linked),
            Err(e) => {
                warn!(file = %file.path.display(), error = %e, "hardlink failed, copying from source instead");
            }
        }
    }

    match link::copy_file(&file.path, dest) {
        Ok(bytes) => Ok(Materialized::Copied(bytes)),
        Err(e) => Err(FileFailure::new(&file.path, &e)),
    }
}

/// Drives a whole run's worth of materializations.
pub struct Replicator<'a> {
    backend: &'a dyn LinkBackend,
    options: &'a EngineOptions,
    cancel: &'a CancellationToken,
}

impl<'a> Replicator<'a> {
    pub fn new(
        backend: &'a dyn LinkBackend,
        options: &'a EngineOptions,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            backend,
            options,
            cancel,
        }
    }

    /// Replicate every source into `snapshot_root`.
    ///
    /// `sources` pairs each source root with the subdirectory key it mirrors
    /// under, so the layout is identical run to run and comparison stays
    /// path-aligned.
    pub fn replicate(
        &self,
        sources: &[(String, PathBuf)],
        snapshot_root: &Path,
        previous_root: Option<&Path>,
        filter: &PathFilter,
        progress: &mut ProgressPublisher,
    ) -> ReplicationOutcome {
        let mut outcome = ReplicationOutcome::default();

        // Scan phase: establish the work list and the progress totals.
        let mut pending = Vec::with_capacity(sources.len());
        let mut files_total = 0usize;
        let mut bytes_total = 0u64;
        for (key, root) in sources {
            if self.cancel.is_cancelled() {
                outcome.cancelled = true;
                return outcome;
            }
            let scan = scan_source(root, filter);
            files_total += scan.files.len();
            bytes_total += scan.total_bytes;
            outcome.failures.extend(scan.failures);
            pending.push((key.as_str(), scan.files));
        }
        progress.set_totals(files_total, bytes_total);
        info!(files = files_total, bytes = bytes_total, "scan complete");

        // Probe once per run; a share that refuses hardlinks turns every
        // unchanged file into a copy, which is slower but always correct.
        let hardlinks_supported =
            previous_root.is_some() && self.backend.supports_hardlinks(snapshot_root);
        if previous_root.is_some() && !hardlinks_supported {
            warn!("destination does not support hardlinks; unchanged files will be copied");
        }

        'sources: for (key, files) in pending {
            for file in files {
                if self.cancel.is_cancelled() {
                    outcome.cancelled = true;
                    break 'sources;
                }
                progress.start_file(&file.path);

                let dest = snapshot_root.join(key).join(&file.relative_path);
                let previous_file =
                    previous_root.map(|root| root.join(key).join(&file.relative_path));

                let source_meta = match FileMeta::from_path(&file.path) {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!(file = %file.path.display(), error = %e, "failed to read source metadata");
                        outcome.failures.push(FileFailure::new(&file.path, &e));
                        continue;
                    }
                };

                let comparison = match previous_file.as_deref() {
                    Some(previous) if hardlinks_supported => {
                        compare(&file.path, &source_meta, previous, self.options.binary_compare)
                    }
                    // Without a link target every file is written fresh.
                    _ => ComparisonOutcome::New,
                };

                match materialize(
                    self.backend,
                    self.options,
                    &file,
                    &dest,
                    previous_file.as_deref(),
                    comparison,
                ) {
                    Ok(Materialized::Linked) => {
                        outcome.files_linked += 1;
                        progress.finish_file(file.size);
                    }
                    Ok(Materialized::Copied(bytes)) => {
                        outcome.files_copied += 1;
                        outcome.bytes_copied += bytes;
                        progress.finish_file(file.size);
                    }
                    Err(failure) => {
                        warn!(file = %failure.path.display(), error = %failure.error, "failed to back up file");
                        outcome.failures.push(failure);
                    }
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::link::StdLinkBackend;
    use crate::progress::ProgressSnapshot;
    use tokio::sync::watch;
    use tempfile::TempDir;

    fn publisher() -> (ProgressPublisher, watch::Receiver<ProgressSnapshot>) {
        let (tx, rx) = watch::channel(ProgressSnapshot::default());
        (ProgressPublisher::new(tx), rx)
    }

    fn replicate_once(
        sources: &[(String, PathBuf)],
        snapshot_root: &Path,
        previous_root: Option<&Path>,
    ) -> ReplicationOutcome {
        let backend = StdLinkBackend;
        let options = EngineOptions::default();
        let cancel = CancellationToken::new();
        let replicator = Replicator::new(&backend, &options, &cancel);
        let (mut progress, _rx) = publisher();
        replicator.replicate(
            sources,
            snapshot_root,
            previous_root,
            &PathFilter::default(),
            &mut progress,
        )
    }

    #[test]
    fn test_first_run_copies_everything() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), b"alpha").unwrap();
        fs::create_dir(source.path().join("sub")).unwrap();
        fs::write(source.path().join("sub/b.txt"), b"beta!").unwrap();

        let sources = vec![("data".to_string(), source.path().to_path_buf())];
        let snapshot = dest.path().join("snap1");
        fs::create_dir(&snapshot).unwrap();

        let outcome = replicate_once(&sources, &snapshot, None);
        assert_eq!(outcome.files_copied, 2);
        assert_eq!(outcome.files_linked, 0);
        assert_eq!(outcome.bytes_copied, 10);
        assert!(outcome.failures.is_empty());
        assert!(!outcome.cancelled);

        assert_eq!(fs::read(snapshot.join("data/a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(snapshot.join("data/sub/b.txt")).unwrap(), b"beta!");
    }

    #[test]
    #[cfg(unix)]
    fn test_second_run_links_unchanged_files() {
        use std::os::unix::fs::MetadataExt;

        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), b"alpha").unwrap();

        let sources = vec![("data".to_string(), source.path().to_path_buf())];
        let snap1 = dest.path().join("snap1");
        let snap2 = dest.path().join("snap2");
        fs::create_dir(&snap1).unwrap();
        fs::create_dir(&snap2).unwrap();

        replicate_once(&sources, &snap1, None);
        let outcome = replicate_once(&sources, &snap2, Some(&snap1));

        assert_eq!(outcome.files_linked, 1);
        assert_eq!(outcome.files_copied, 0);
        assert_eq!(outcome.bytes_copied, 0);

        let first = fs::metadata(snap1.join("data/a.txt")).unwrap();
        let second = fs::metadata(snap2.join("data/a.txt")).unwrap();
        assert_eq!(first.ino(), second.ino());
        assert_eq!(second.nlink(), 2);
    }

    #[test]
    #[cfg(unix)]
    fn test_changed_file_gets_independent_copy() {
        use std::os::unix::fs::MetadataExt;
        use std::time::{Duration, SystemTime};

        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let file = source.path().join("a.txt");
        fs::write(&file, b"alpha").unwrap();

        let sources = vec![("data".to_string(), source.path().to_path_buf())];
        let snap1 = dest.path().join("snap1");
        let snap2 = dest.path().join("snap2");
        fs::create_dir(&snap1).unwrap();
        fs::create_dir(&snap2).unwrap();

        replicate_once(&sources, &snap1, None);

        // Rewrite with same length but a clearly different mtime.
        fs::write(&file, b"ALPHA").unwrap();
        let handle = fs::OpenOptions::new().write(true).open(&file).unwrap();
        handle
            .set_modified(SystemTime::now() + Duration::from_secs(120))
            .unwrap();
        drop(handle);

        let outcome = replicate_once(&sources, &snap2, Some(&snap1));
        assert_eq!(outcome.files_copied, 1);
        assert_eq!(outcome.files_linked, 0);

        let copied = fs::metadata(snap2.join("data/a.txt")).unwrap();
        assert_eq!(copied.nlink(), 1);
        assert_eq!(fs::read(snap2.join("data/a.txt")).unwrap(), b"ALPHA");
        assert_eq!(fs::read(snap1.join("data/a.txt")).unwrap(), b"alpha");
    }

    #[test]
    fn test_pre_cancelled_token_does_no_work() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), b"alpha").unwrap();

        let sources = vec![("data".to_string(), source.path().to_path_buf())];
        let snapshot = dest.path().join("snap1");
        fs::create_dir(&snapshot).unwrap();

        let backend = StdLinkBackend;
        let options = EngineOptions::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let replicator = Replicator::new(&backend, &options, &cancel);
        let (mut progress, _rx) = publisher();

        let outcome = replicator.replicate(
            &sources,
            &snapshot,
            None,
            &PathFilter::default(),
            &mut progress,
        );
        assert!(outcome.cancelled);
        assert_eq!(outcome.files_copied, 0);
        assert!(!snapshot.join("data/a.txt").exists());
    }

    #[test]
    fn test_vanished_source_recorded_as_failure() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("dest.txt");
        let ghost = SourceFile {
            path: dir.path().join("ghost.txt"),
            relative_path: PathBuf::from("ghost.txt"),
            size: 4,
        };

        let result = materialize(
            &StdLinkBackend,
            &EngineOptions::default(),
            &ghost,
            &dest,
            None,
            ComparisonOutcome::New,
        );
        let failure = result.unwrap_err();
        assert_eq!(failure.path, ghost.path);
        assert!(!dest.exists());
    }

    #[test]
    fn test_duplicate_sources_mirror_independently() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), b"alpha").unwrap();

        let sources = vec![
            ("data".to_string(), source.path().to_path_buf()),
            ("data-2".to_string(), source.path().to_path_buf()),
        ];
        let snapshot = dest.path().join("snap1");
        fs::create_dir(&snapshot).unwrap();

        let outcome = replicate_once(&sources, &snapshot, None);
        assert_eq!(outcome.files_copied, 2);
        assert!(snapshot.join("data/a.txt").exists());
        assert!(snapshot.join("data-2/a.txt").exists());
    }

    #[test]
    fn test_progress_reaches_totals() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), b"12345").unwrap();
        fs::write(source.path().join("b.txt"), b"123").unwrap();

        let sources = vec![("data".to_string(), source.path().to_path_buf())];
        let snapshot = dest.path().join("snap1");
        fs::create_dir(&snapshot).unwrap();

        let backend = StdLinkBackend;
        let options = EngineOptions::default();
        let cancel = CancellationToken::new();
        let replicator = Replicator::new(&backend, &options, &cancel);
        let (mut progress, rx) = publisher();

        replicator.replicate(
            &sources,
            &snapshot,
            None,
            &PathFilter::default(),
            &mut progress,
        );

        let last = rx.borrow().clone();
        assert_eq!(last.files_total, 2);
        assert_eq!(last.bytes_total, 8);
        assert_eq!(last.files_processed, 2);
        assert_eq!(last.bytes_processed, 8);
    }
}
