//! Archiver: timestamped backups of the results file.
//!
//! The backup runs before transformation so that the rows the transformer
//! discards survive somewhere. It is best-effort: a failed or skipped
//! backup never blocks the rest of the cycle.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Errors from the backup step.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to create backup directory {dir}: {source}")]
    CreateDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to copy {src} to {dst}: {source}")]
    Copy {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Backup file name for a given instant: `result_<YYYYMMDD_HHMMSS>.csv`.
///
/// Two backups within the same second collide; the later copy wins.
pub fn backup_file_name(now: &DateTime<Local>) -> String {
    format!("result_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

/// Copies the results file into a backup directory before each rewrite.
#[derive(Debug, Clone)]
pub struct Archiver {
    backup_dir: PathBuf,
    keep_last: Option<usize>,
}

impl Archiver {
    /// Create an archiver targeting `backup_dir`.
    pub fn new(backup_dir: impl Into<PathBuf>, keep_last: Option<usize>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            keep_last,
        }
    }

    /// Back up `results_path` byte-for-byte.
    ///
    /// Returns `Ok(None)` when there is nothing to back up (the file does
    /// not exist) and `Ok(Some(path))` with the backup location otherwise.
    pub fn backup(&self, results_path: &Path) -> Result<Option<PathBuf>, ArchiveError> {
        if !results_path.exists() {
            info!(
                path = %results_path.display(),
                "No results file to back up"
            );
            return Ok(None);
        }

        std::fs::create_dir_all(&self.backup_dir).map_err(|source| ArchiveError::CreateDir {
            dir: self.backup_dir.clone(),
            source,
        })?;

        let backup_path = self.backup_dir.join(backup_file_name(&Local::now()));
        std::fs::copy(results_path, &backup_path).map_err(|source| ArchiveError::Copy {
            src: results_path.to_path_buf(),
            dst: backup_path.clone(),
            source,
        })?;

        info!(backup = %backup_path.display(), "Backup created");

        if let Some(keep) = self.keep_last {
            self.prune(keep);
        }

        Ok(Some(backup_path))
    }

    /// Remove all but the newest `keep` backups. Best-effort; failures are
    /// logged and ignored.
    fn prune(&self, keep: usize) {
        let entries = match std::fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    dir = %self.backup_dir.display(),
                    error = %err,
                    "Failed to list backup directory for pruning"
                );
                return;
            }
        };

        let mut backups: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("result_") && n.ends_with(".csv"))
            })
            .collect();

        if backups.len() <= keep {
            return;
        }

        // The timestamped names sort chronologically.
        backups.sort();
        let excess = backups.len() - keep;
        for old in backups.into_iter().take(excess) {
            match std::fs::remove_file(&old) {
                Ok(()) => debug!(backup = %old.display(), "Pruned old backup"),
                Err(err) => warn!(
                    backup = %old.display(),
                    error = %err,
                    "Failed to prune old backup"
                ),
            }
        }
    }
}
