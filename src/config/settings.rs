//! Process-level settings file (`settings.toml`).
//!
//! Holds the defaults the trading framework consults at startup: which
//! provider/model to use when the caller names none, where the artifact
//! namespace lives, and how long artifacts are retained.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};

/// File name for the settings file.
pub const SETTINGS_FILE: &str = "settings.toml";

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Provider used when the caller names none.
    pub default_provider: String,
    /// Model used when the caller names none.
    pub default_model: String,
    /// Override for the artifact data root. `None` uses the platform data dir.
    pub data_dir: Option<PathBuf>,
    /// Retention window for artifact sweeps, in days.
    pub retention_days: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_provider: "deepseek".to_string(),
            default_model: "deepseek-chat".to_string(),
            data_dir: None,
            retention_days: 7,
        }
    }
}

impl Settings {
    /// Load settings from `dir/settings.toml`.
    ///
    /// Returns defaults if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error only if the file exists but is invalid.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let settings: Self = toml::from_str(&content)
            .map_err(|e| TallyError::Config(format!("invalid settings file: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to `dir/settings.toml` via a temp file + rename.
    ///
    /// # Errors
    /// Returns an error if validation or the write fails.
    pub fn save(&self, dir: &Path) -> Result<()> {
        self.validate()?;
        fs::create_dir_all(dir)?;

        let content = toml::to_string_pretty(self)
            .map_err(|e| TallyError::Config(format!("failed to serialize settings: {e}")))?;

        let path = dir.join(SETTINGS_FILE);
        let tmp = dir.join(format!("{SETTINGS_FILE}.tmp"));
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;

        tracing::debug!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Validate settings values.
    ///
    /// # Errors
    /// Returns an error if retention is zero or a default name is empty.
    pub fn validate(&self) -> Result<()> {
        if self.retention_days == 0 {
            return Err(TallyError::Config(
                "retention_days must be greater than 0".to_string(),
            ));
        }
        if self.default_provider.is_empty() || self.default_model.is_empty() {
            return Err(TallyError::Config(
                "default_provider and default_model must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}
