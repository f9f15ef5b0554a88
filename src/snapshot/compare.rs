//! Change detection against the previous complete snapshot.

use crate::fs::link::IO_BUFFER_SIZE;
use crate::fs::metadata::FileMeta;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

/// Classification of a source file relative to its counterpart in the
/// previous snapshot; drives the link-vs-copy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOutcome {
    /// Counterpart matches; safe to hardlink.
    Unchanged,
    /// Counterpart differs; must copy.
    Changed,
    /// No counterpart; must copy.
    New,
}

/// Compare a source file against the file at the same relative location in
/// the previous snapshot.
///
/// The fast path is a metadata check: equal size and equal whole-second
/// mtime means unchanged, same heuristic as rsync's default. `binary`
/// additionally streams both files and short-circuits on the first
/// differing byte, for callers worried about clock skew. Trouble reading
/// the previous snapshot degrades to a copy rather than an error: a copy
/// is always correct, just not deduplicated.
pub fn compare(
    source: &Path,
    source_meta: &FileMeta,
    previous_file: &Path,
    binary: bool,
) -> ComparisonOutcome {
    let prev_meta = match fs::metadata(previous_file) {
        Ok(m) if m.is_file() => FileMeta::from_metadata(&m),
        Ok(_) => return ComparisonOutcome::New,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return ComparisonOutcome::New,
        Err(e) => {
            debug!(file = %previous_file.display(), error = %e, "previous snapshot unreadable");
            return ComparisonOutcome::New;
        }
    };

    if source_meta.size != prev_meta.size || source_meta.modified_secs != prev_meta.modified_secs {
        return ComparisonOutcome::Changed;
    }

    if binary {
        match contents_equal(source, previous_file) {
            Ok(true) => ComparisonOutcome::Unchanged,
            Ok(false) => ComparisonOutcome::Changed,
            Err(e) => {
                debug!(file = %source.display(), error = %e, "binary comparison failed");
                ComparisonOutcome::Changed
            }
        }
    } else {
        ComparisonOutcome::Unchanged
    }
}

/// Streamed byte comparison with a fixed buffer, stopping at the first
/// mismatch.
fn contents_equal(a: &Path, b: &Path) -> io::Result<bool> {
    let mut file_a = File::open(a)?;
    let mut file_b = File::open(b)?;

    if file_a.metadata()?.len() != file_b.metadata()?.len() {
        return Ok(false);
    }

    let mut buf_a = vec![0u8; IO_BUFFER_SIZE];
    let mut buf_b = vec![0u8; IO_BUFFER_SIZE];
    loop {
        let n = file_a.read(&mut buf_a)?;
        if n == 0 {
            return Ok(true);
        }
        // Lengths match, so the other stream must be able to produce n bytes.
        file_b.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}
