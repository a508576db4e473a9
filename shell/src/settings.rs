//! Persisted user settings.
//!
//! Loaded explicitly when the shell is opened and written back at shutdown.

use crate::error::ShellError;
use archiver::{ArchiveType, CompressionLevel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory under the platform config dir holding our files.
pub const APP_DIR: &str = "archive-shell";

pub const SETTINGS_FILE: &str = "settings.json";

/// Settings structure for persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Explicit archiver executable; looked up automatically when unset
    pub binary_path: Option<PathBuf>,
    pub default_archive_type: ArchiveType,
    pub compression_level: CompressionLevel,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            binary_path: None,
            default_archive_type: ArchiveType::SevenZ,
            compression_level: CompressionLevel::NORMAL,
        }
    }
}

/// Location of the settings file, under `dir` or the platform config directory.
pub fn settings_path(dir: Option<&Path>) -> Result<PathBuf, ShellError> {
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::config_dir()
            .ok_or_else(|| ShellError::Settings("Failed to get config directory".to_string()))?
            .join(APP_DIR),
    };
    Ok(dir.join(SETTINGS_FILE))
}

impl Settings {
    /// Load settings from `path`.
    ///
    /// A missing file gives the defaults. So does a file that cannot be
    /// parsed, after logging a warning.
    pub async fn load(path: &Path) -> Result<Settings, ShellError> {
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Settings::default());
        }

        let contents = tokio::fs::read_to_string(path).await?;

        let settings = serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "failed to parse settings file, using defaults");
            Settings::default()
        });

        Ok(settings)
    }

    /// Save settings to `path`, creating its directory if needed.
    pub async fn save(&self, path: &Path) -> Result<(), ShellError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ShellError::Settings(format!("Failed to serialize settings: {}", e)))?;

        tokio::fs::write(path, json).await?;
        debug!(path = %path.display(), "settings saved");
        Ok(())
    }
}
