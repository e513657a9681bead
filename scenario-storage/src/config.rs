//! Storage backend selection.

use crate::error::StorageError;
use scenario_journal::{FsyncPolicy, DEFAULT_JOURNAL_FILE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Where conversation histories are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory; lost on exit.
    #[default]
    Memory,
    /// Append-only journal under `data_dir`.
    Journal,
}

impl FromStr for StorageBackend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "journal" => Ok(StorageBackend::Journal),
            other => Err(StorageError::InvalidBackend(other.to_string())),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Memory => f.write_str("memory"),
            StorageBackend::Journal => f.write_str("journal"),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Directory for the journal file.
    pub data_dir: PathBuf,

    pub fsync_policy: FsyncPolicy,

    /// Appends between compactions (0 disables compaction).
    pub compaction_threshold: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: PathBuf::from("./data"),
            fsync_policy: FsyncPolicy::EveryWrite,
            compaction_threshold: 10_000,
        }
    }
}

impl StorageConfig {
    /// Journal-backed configuration rooted at `data_dir`.
    pub fn journal(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackend::Journal,
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(DEFAULT_JOURNAL_FILE)
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.backend == StorageBackend::Journal && self.data_dir.as_os_str().is_empty() {
            return Err(StorageError::InvalidConfig(
                "data_dir is required for the journal backend".to_string(),
            ));
        }
        Ok(())
    }
}
