//! File metadata reads for change detection and copy fidelity.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// The metadata a backup run cares about: size, whole-second mtime, and the
/// unix mode so copies keep their permissions.
///
/// Modification times are quantized to seconds because some network
/// filesystems round them; a sub-second difference must never count as a
/// change between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    /// File size in bytes
    pub size: u64,

    /// Last modified time, truncated to seconds since the Unix epoch
    pub modified_secs: u64,

    /// Unix permission bits, when the platform has them
    pub mode: Option<u32>,
}

impl FileMeta {
    /// Read metadata fresh from the filesystem. Never cached across runs.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self::from_metadata(&metadata))
    }

    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        let modified_secs = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode())
        };

        #[cfg(not(unix))]
        let mode = None;

        Self {
            size: metadata.len(),
            modified_secs,
            mode,
        }
    }

    /// Re-apply this metadata to a freshly written copy at `path`.
    ///
    /// The mtime must land first: the mode may be read-only, which would
    /// block the writable open that setting the time needs.
    pub fn apply_to(&self, path: &Path) -> io::Result<()> {
        let file = fs::OpenOptions::new().write(true).open(path)?;
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(self.modified_secs);
        file.set_modified(mtime)?;
        drop(file);

        #[cfg(unix)]
        if let Some(mode) = self.mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }

        Ok(())
    }
}
