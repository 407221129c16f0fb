//! Path resolution for medsync configuration and data files.
//!
//! All medsync data is stored in `~/.medsync/` unless `MEDSYNC_HOME` is set:
//! - `config.yaml` - Main configuration file
//! - `medsync.db` - SQLite database holding records and the sync queue

use std::path::PathBuf;

use crate::error::SyncError;

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "MEDSYNC_HOME";

/// Paths to medsync configuration and data files.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root directory: `~/.medsync/`
    pub root: PathBuf,
    /// Config file: `~/.medsync/config.yaml`
    pub config_file: PathBuf,
    /// Database file: `~/.medsync/medsync.db`
    pub database: PathBuf,
}

impl Paths {
    /// Resolve paths from `MEDSYNC_HOME`, falling back to the user's home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if neither `MEDSYNC_HOME` nor `HOME` is set.
    pub fn new() -> Result<Self, SyncError> {
        if let Ok(root) = std::env::var(HOME_ENV) {
            if !root.is_empty() {
                return Ok(Self::with_root(PathBuf::from(root)));
            }
        }

        let home = std::env::var("HOME")
            .map_err(|_| SyncError::Config("Could not determine home directory".to_string()))?;

        Ok(Self::with_root(PathBuf::from(home).join(".medsync")))
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_file: root.join("config.yaml"),
            database: root.join("medsync.db"),
            root,
        }
    }

    /// Ensure the data directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure_dirs(&self) -> Result<(), SyncError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| {
                SyncError::Config(format!(
                    "Failed to create directory {}: {e}",
                    self.root.display()
                ))
            })?;
        }
        Ok(())
    }
}
