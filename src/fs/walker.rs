//! Deterministic source-tree scanning.
//!
//! One scan per source directory: depth-first, entries sorted by name so two
//! runs over the same tree visit files in the same order, with excluded
//! directories pruned before their contents are ever touched (which also
//! bounds symlink loops).

use crate::filter::PathFilter;
use crate::utils::errors::FileFailure;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// A regular file discovered under a source root.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the source root
    pub relative_path: PathBuf,

    /// Size in bytes at scan time
    pub size: u64,
}

impl SourceFile {
    /// Build a `SourceFile` from a walk entry.
    ///
    /// Symlinks are resolved to their target so the backup captures real
    /// content; symlinks to directories, broken symlinks and non-regular
    /// files (sockets, fifos) are skipped with `None`.
    fn from_entry(entry: &DirEntry, root: &Path) -> io::Result<Option<Self>> {
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        let size = if entry.path_is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_file() => resolved.len(),
                // Symlink to a directory or to something non-regular: skip
                Ok(_) => return Ok(None),
                // Broken symlink: skip
                Err(_) => return Ok(None),
            }
        } else {
            if !entry.file_type().is_file() {
                return Ok(None);
            }
            entry
                .metadata()
                .map_err(|e| {
                    e.into_io_error()
                        .unwrap_or_else(|| io::Error::other("unreadable metadata"))
                })?
                .len()
        };

        Ok(Some(Self {
            path,
            relative_path,
            size,
        }))
    }
}

/// Outcome of scanning one source directory.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: Vec<SourceFile>,
    pub failures: Vec<FileFailure>,
    pub total_bytes: u64,
}

/// Walk `root` depth-first and collect every non-excluded regular file.
///
/// Unreadable entries become failures and the walk continues; a single bad
/// subtree must not hide the rest of the source.
pub fn scan_source(root: &Path, filter: &PathFilter) -> ScanResult {
    let mut result = ScanResult::default();

    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    loop {
        let entry = match walker.next() {
            None => break,
            Some(Err(e)) => {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                result.failures.push(FileFailure::new(path, &e));
                continue;
            }
            Some(Ok(entry)) => entry,
        };

        if entry.file_type().is_dir() {
            if filter.is_excluded(entry.path()) {
                walker.skip_current_dir();
            }
            continue;
        }

        match SourceFile::from_entry(&entry, root) {
            Ok(Some(file)) => {
                result.total_bytes += file.size;
                result.files.push(file);
            }
            Ok(None) => {}
            Err(e) => result.failures.push(FileFailure::new(entry.path(), &e)),
        }
    }

    result
}
