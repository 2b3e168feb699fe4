//! Retention sweeping for artifact directories.
//!
//! [`RetentionSweeper`] deletes artifacts older than a retention window
//! from the category directories. Usage records are out of scope here; the
//! store prunes those itself.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::error::{Result, TallyError};
use crate::storage::paths::{ArtifactCategory, DataPaths};

const SECONDS_PER_DAY: u64 = 86_400;

/// Filenames with these prefixes survive every sweep.
const PROTECTED_PREFIXES: &[&str] = &["README", "."];

/// One file the sweeper could not delete.
#[derive(Debug)]
pub struct SweepFailure {
    pub path: PathBuf,
    pub error: std::io::Error,
}

/// Outcome of one sweep pass.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Files deleted, total.
    pub deleted: usize,
    /// Files deleted per category, in [`ArtifactCategory::ALL`] order.
    pub deleted_by_category: Vec<(ArtifactCategory, usize)>,
    /// Per-file deletion failures. A failure never aborts the sweep.
    pub failures: Vec<SweepFailure>,
}

/// Deletes expired artifacts beneath a data namespace.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    paths: DataPaths,
}

impl RetentionSweeper {
    #[must_use]
    pub const fn new(paths: DataPaths) -> Self {
        Self { paths }
    }

    /// Delete artifacts older than `retention_days` from every category
    /// directory.
    ///
    /// Age is judged by filesystem modification time. Subdirectories,
    /// dotfiles, and `README*` files are left alone. Files that cannot be
    /// inspected or deleted are reported in the result instead of aborting
    /// the pass. A missing category directory counts as zero deletions.
    ///
    /// # Errors
    /// Returns `Config` when `retention_days` is zero; a zero-day window
    /// would delete everything, which is never what retention means.
    pub fn cleanup_old_files(&self, retention_days: u64) -> Result<SweepReport> {
        if retention_days == 0 {
            return Err(TallyError::Config(
                "retention_days must be at least 1".to_string(),
            ));
        }

        let cutoff = SystemTime::now() - Duration::from_secs(retention_days * SECONDS_PER_DAY);
        let mut report = SweepReport::default();

        for category in ArtifactCategory::ALL {
            let deleted = self.sweep_category(category, cutoff, &mut report);
            report.deleted += deleted;
            report.deleted_by_category.push((category, deleted));
        }

        tracing::info!(
            retention_days,
            deleted = report.deleted,
            failures = report.failures.len(),
            "retention sweep complete"
        );
        Ok(report)
    }

    fn sweep_category(
        &self,
        category: ArtifactCategory,
        cutoff: SystemTime,
        report: &mut SweepReport,
    ) -> usize {
        let dir = self.paths.category_dir(category);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            // Nothing to sweep if the directory was never created.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(err) => {
                report.failures.push(SweepFailure { path: dir, error: err });
                return 0;
            }
        };

        let mut deleted = 0;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    report.failures.push(SweepFailure {
                        path: dir.clone(),
                        error: err,
                    });
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || is_protected(&path) {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    report.failures.push(SweepFailure { path, error: err });
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }

            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), %category, "expired artifact deleted");
                    deleted += 1;
                }
                Err(err) => report.failures.push(SweepFailure { path, error: err }),
            }
        }
        deleted
    }
}

fn is_protected(path: &std::path::Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| {
            PROTECTED_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
        })
}
