//! Configuration for emat-storage

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("emat-storage")
}

fn default_database_path() -> PathBuf {
    default_storage_dir().join("emat.db")
}

/// Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Use WAL journaling so other connections to the file can read while
    /// this handle writes. A single handle still serializes its own calls.
    #[serde(default = "default_true")]
    pub wal: bool,

    /// How long a connection waits on a locked database file
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Create the database file (and its directory) when missing
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
}

fn default_true() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal: true,
            busy_timeout_ms: default_busy_timeout_ms(),
            create_if_missing: true,
        }
    }
}

impl StorageConfig {
    /// Config pointing at a specific database file, other fields defaulted
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            database_path: path.into(),
            ..Default::default()
        }
    }

    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| StorageError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StorageError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
