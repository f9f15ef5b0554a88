//! Exclusion filtering for the directory walk.

use std::path::{Path, PathBuf};

/// Decides whether a discovered directory is excluded from the backup.
///
/// A candidate is excluded if it equals, or is a descendant of, any entry in
/// the exclude set. Comparison is case-insensitive and separator-normalized
/// because source lists may have been written on a platform with different
/// conventions than the one doing the backup.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    excludes: Vec<String>,
}

impl PathFilter {
    pub fn new<I>(excludes: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        Self {
            excludes: excludes.into_iter().map(|p| normalize(&p)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.excludes.is_empty()
    }

    /// True if `candidate` or any of its ancestors is in the exclude set.
    pub fn is_excluded(&self, candidate: &Path) -> bool {
        let normalized = normalize(candidate);
        self.excludes.iter().any(|exclude| {
            normalized == *exclude
                || (normalized.starts_with(exclude.as_str())
                    && normalized.as_bytes().get(exclude.len()) == Some(&b'/'))
        })
    }
}

/// Lowercased, forward-slashed, no trailing separator.
fn normalize(path: &Path) -> String {
    let mut s = path
        .to_string_lossy()
        .replace('\\', "/")
        .to_lowercase();
    while s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    s
}
