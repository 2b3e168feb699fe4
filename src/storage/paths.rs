//! Artifact namespace paths and resolution.
//!
//! [`DataPaths`] locates the namespace roots (platform data dir or an
//! explicit override); [`PathResolver`] computes concrete artifact paths.
//! Resolution is pure: no directory is created and no file is touched until
//! the caller writes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;

/// Artifact category within the data namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactCategory {
    Report,
    Log,
    Cache,
    Temp,
}

impl ArtifactCategory {
    /// All categories, in namespace order.
    pub const ALL: [Self; 4] = [Self::Report, Self::Log, Self::Cache, Self::Temp];

    /// Directory name under the data root.
    #[must_use]
    pub const fn dir_name(&self) -> &'static str {
        match self {
            Self::Report => "reports",
            Self::Log => "logs",
            Self::Cache => "cache",
            Self::Temp => "temp",
        }
    }

    /// File extension for artifacts in this category.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Report => "md",
            Self::Log => "log",
            Self::Cache => "json",
            Self::Temp => "tmp",
        }
    }
}

impl std::fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// Roots of the artifact namespace.
#[derive(Debug, Clone)]
pub struct DataPaths {
    base: PathBuf,
}

impl DataPaths {
    /// Namespace rooted at the platform data directory.
    #[must_use]
    pub fn new() -> Self {
        let base = ProjectDirs::from("com", "tradingagents", "tally").map_or_else(
            || PathBuf::from(".").join("data"),
            |dirs| dirs.data_dir().to_path_buf(),
        );
        Self { base }
    }

    /// Namespace rooted at an explicit directory.
    #[must_use]
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The namespace root.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory for one artifact category.
    #[must_use]
    pub fn category_dir(&self, category: ArtifactCategory) -> PathBuf {
        self.base.join(category.dir_name())
    }

    /// Path to the usage record database file.
    #[must_use]
    pub fn usage_db_file(&self) -> PathBuf {
        self.base.join("usage-records.sqlite")
    }

    /// Ensure all category directories exist.
    ///
    /// # Errors
    /// Returns an error if any directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for category in ArtifactCategory::ALL {
            std::fs::create_dir_all(self.category_dir(category))?;
        }
        Ok(())
    }
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes canonical artifact paths. Pure and deterministic: identical
/// (root, category, identifier, kind, timestamp) inputs always yield the
/// same path.
#[derive(Debug, Clone)]
pub struct PathResolver {
    paths: DataPaths,
}

impl PathResolver {
    #[must_use]
    pub const fn new(paths: DataPaths) -> Self {
        Self { paths }
    }

    /// Canonical path for an artifact.
    ///
    /// Filename is `{identifier}_{kind}_{YYYYMMDD_HHMMSS}.{ext}`, so calls
    /// at sufficiently different timestamps never collide. Two calls within
    /// the same second yield the same path deterministically; the caller's
    /// write is last-write-wins. Identifier and kind are sanitized so they
    /// cannot escape the category directory.
    #[must_use]
    pub fn path_for(
        &self,
        category: ArtifactCategory,
        identifier: &str,
        kind: &str,
        timestamp: DateTime<Utc>,
    ) -> PathBuf {
        let stamp = timestamp.format("%Y%m%d_%H%M%S");
        let filename = format!(
            "{}_{}_{stamp}.{}",
            sanitize(identifier),
            sanitize(kind),
            category.extension()
        );
        self.paths.category_dir(category).join(filename)
    }

    /// Canonical path stamped with the current instant.
    #[must_use]
    pub fn path_for_now(
        &self,
        category: ArtifactCategory,
        identifier: &str,
        kind: &str,
    ) -> PathBuf {
        self.path_for(category, identifier, kind, Utc::now())
    }

    /// The namespace this resolver operates on.
    #[must_use]
    pub const fn data_paths(&self) -> &DataPaths {
        &self.paths
    }
}

/// Replace path separators and other unsafe characters with underscores.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
