//! snapvault - Main entry point
//!
//! CLI front-end over the backup engine: builds a request from a TOML
//! profile and/or flags, starts a session, renders progress, and maps
//! Ctrl-C to cooperative cancellation.

use anyhow::{bail, Result};
use clap::Parser;
use snapvault::config::Profile;
use snapvault::{utils, BackupRequest, BackupSession, TerminalState};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML backup profile
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Source directory to back up (repeatable, adds to the profile's list)
    #[arg(short, long)]
    source: Vec<PathBuf>,

    /// Directory subtree to exclude (repeatable)
    #[arg(short = 'x', long)]
    exclude: Vec<PathBuf>,

    /// Destination root for snapshots (overrides the profile)
    #[arg(short, long)]
    dest: Option<PathBuf>,

    /// Maximum number of snapshots to retain (overrides the profile)
    #[arg(short, long)]
    keep: Option<usize>,

    /// Byte-compare unchanged candidates instead of trusting size + mtime
    #[arg(long)]
    verify: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

fn build_request(args: &Args) -> Result<(BackupRequest, String)> {
    let profile = args
        .config
        .as_ref()
        .map(|path| Profile::from_file(path))
        .transpose()?;

    let log_level = args
        .log_level
        .clone()
        .or_else(|| profile.as_ref().map(|p| p.log.level.clone()))
        .unwrap_or_else(|| "info".to_string());

    let mut request = match profile {
        Some(profile) => profile.into_request(),
        None => {
            let Some(dest) = args.dest.clone() else {
                bail!("either --config or --dest is required");
            };
            BackupRequest::new(dest, Vec::new())
        }
    };

    if let Some(dest) = &args.dest {
        request.destination_root = dest.clone();
    }
    request.sources.extend(args.source.iter().cloned());
    request.excludes.extend(args.exclude.iter().cloned());
    if let Some(keep) = args.keep {
        request.max_snapshots = keep;
    }
    if args.verify {
        request.options.binary_compare = true;
    }

    if request.sources.is_empty() {
        bail!("no source directories given; use --source or a profile");
    }

    Ok((request, log_level))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (request, log_level) = build_request(&args)?;

    utils::logger::init(&log_level)?;
    tracing::info!(
        "Starting snapvault v{} ({} sources -> {})",
        env!("CARGO_PKG_VERSION"),
        request.sources.len(),
        request.destination_root.display()
    );

    let session = BackupSession::new();
    let mut progress = session.progress();
    let handle = match session.start(request) {
        Ok(handle) => handle,
        Err(e) => bail!("{e}"),
    };

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(500));
    let mut wait = std::pin::pin!(handle.wait());

    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, stopping at the next file boundary");
                session.cancel();
            }
            _ = ticker.tick() => {
                let snapshot = progress.borrow_and_update().clone();
                if snapshot.files_total > 0 {
                    match &snapshot.current_path {
                        Some(current) => tracing::info!(
                            "progress: {}/{} files, {}/{} bytes ({})",
                            snapshot.files_processed,
                            snapshot.files_total,
                            snapshot.bytes_processed,
                            snapshot.bytes_total,
                            current.display()
                        ),
                        None => tracing::info!(
                            "progress: {}/{} files",
                            snapshot.files_processed,
                            snapshot.files_total
                        ),
                    }
                }
            }
        }
    };

    for failure in &outcome.failures {
        tracing::warn!("not backed up: {failure}");
    }

    match outcome.state {
        TerminalState::Completed => {
            tracing::info!(
                "snapshot {} complete: {} linked, {} copied ({} bytes), {} pruned, {} failures",
                outcome.snapshot.as_deref().unwrap_or("?"),
                outcome.stats.files_linked,
                outcome.stats.files_copied,
                outcome.stats.bytes_copied,
                outcome.stats.snapshots_pruned,
                outcome.failures.len()
            );
            Ok(())
        }
        TerminalState::Cancelled => {
            tracing::info!(
                "backup cancelled; partial snapshot {} left on disk, unused for comparison",
                outcome.snapshot.as_deref().unwrap_or("?")
            );
            Ok(())
        }
        TerminalState::Failed(reason) => bail!("backup failed: {reason}"),
    }
}
