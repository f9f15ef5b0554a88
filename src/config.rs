//! Backup request and profile configuration.
//!
//! A `BackupRequest` is what the engine consumes; a `Profile` is the TOML
//! file the CLI loads, with the same shape plus logging preferences.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of snapshots retained when the caller does not say.
pub const DEFAULT_MAX_SNAPSHOTS: usize = 100;

/// Everything one backup run needs. Immutable once a session starts: the
/// session moves the request into its worker.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    /// Root under which timestamped snapshot directories are created.
    pub destination_root: PathBuf,

    /// Source directories to back up, in order. Duplicates are allowed and
    /// are processed independently.
    pub sources: Vec<PathBuf>,

    /// Directory subtrees excluded from every source (exact paths, not
    /// patterns).
    pub excludes: Vec<PathBuf>,

    /// Maximum number of complete snapshots kept after a successful run.
    pub max_snapshots: usize,

    pub options: EngineOptions,
}

impl BackupRequest {
    pub fn new(destination_root: impl Into<PathBuf>, sources: Vec<PathBuf>) -> Self {
        Self {
            destination_root: destination_root.into(),
            sources,
            excludes: Vec::new(),
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            options: EngineOptions::default(),
        }
    }
}

/// Tunables for the link-or-copy decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Byte-compare files whose size and mtime match before trusting the
    /// metadata fast path. Trades a full read for protection against
    /// clock skew and metadata-only corruption.
    #[serde(default)]
    pub binary_compare: bool,

    /// Attempts before a hardlink that keeps coming up empty is abandoned
    /// in favor of a full copy.
    #[serde(default = "default_link_retries")]
    pub link_retries: u32,
}

fn default_link_retries() -> u32 {
    3
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            binary_compare: false,
            link_retries: default_link_retries(),
        }
    }
}

/// Logging preferences carried in a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// On-disk TOML profile for the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub destination: PathBuf,

    pub sources: Vec<PathBuf>,

    #[serde(default)]
    pub excludes: Vec<PathBuf>,

    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,

    #[serde(default)]
    pub engine: EngineOptions,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_max_snapshots() -> usize {
    DEFAULT_MAX_SNAPSHOTS
}

impl Profile {
    /// Load a profile from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let profile: Profile = toml::from_str(&content)?;
        Ok(profile)
    }

    pub fn into_request(self) -> BackupRequest {
        BackupRequest {
            destination_root: self.destination,
            sources: self.sources,
            excludes: self.excludes,
            max_snapshots: self.max_snapshots,
            options: self.engine,
        }
    }
}
