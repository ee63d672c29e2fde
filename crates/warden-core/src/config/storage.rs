//! Refresh-token storage configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which store backend holds refresh-token records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite database at `path`.
    #[default]
    Sqlite,
    /// Process-local memory. Records do not survive a restart.
    Memory,
}

/// Durable storage for background-capable modes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database file path.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Environment variable containing the base64 AES-256 key.
    #[serde(default)]
    pub encryption_key_env: Option<String>,

    /// Path to a file containing the base64 AES-256 key.
    #[serde(default)]
    pub encryption_key_file: Option<PathBuf>,
}
