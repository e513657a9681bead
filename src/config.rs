//! Binary configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SCENARIO_CONFIG or --config)
//! 3. Environment variables

use scenario_core::{EngineConfig, LockPolicy};
use scenario_storage::{FsyncPolicy, StorageBackend, StorageConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine behaviour.
    pub engine: EngineConfig,
    /// History storage.
    pub storage: StorageConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads the file at `path` (if any), then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config
            .storage
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies overrides looked up through `var`.
    fn apply_overrides(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(policy) = var("SCENARIO_LOCK_POLICY") {
            self.engine.lock_policy = policy
                .parse::<LockPolicy>()
                .map_err(ConfigError::ValidationError)?;
        }
        if let Some(auto) = var("SCENARIO_AUTO_INITIALIZE") {
            self.engine.auto_initialize = auto == "1" || auto.to_lowercase() == "true";
        }

        if let Some(backend) = var("SCENARIO_STORAGE_BACKEND") {
            self.storage.backend = backend
                .parse::<StorageBackend>()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }
        if let Some(dir) = var("SCENARIO_DATA") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(policy) = var("SCENARIO_FSYNC_POLICY") {
            self.storage.fsync_policy = policy
                .parse::<FsyncPolicy>()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }
        if let Some(threshold) = var("SCENARIO_COMPACTION_THRESHOLD") {
            self.storage.compaction_threshold = threshold.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "invalid compaction threshold: {}",
                    threshold
                ))
            })?;
        }

        if let Some(filter) = var("SCENARIO_LOG") {
            self.logging.filter = filter;
        }
        Ok(())
    }
}

/// Log output configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, used when RUST_LOG is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.lock_policy, LockPolicy::Error);
        assert!(config.engine.auto_initialize);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scenario.yaml");
        std::fs::write(
            &path,
            "engine:\n  lock_policy: suppress\nstorage:\n  backend: journal\n  data_dir: /tmp/scn\nlogging:\n  filter: debug\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.engine.lock_policy, LockPolicy::Suppress);
        assert!(config.engine.auto_initialize);
        assert_eq!(config.storage.backend, StorageBackend::Journal);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/scn"));
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn test_file_errors() {
        let dir = TempDir::new().unwrap();
        let missing = Config::from_file(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::IoError(..)));

        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "storage:\n  backend: redis\n").unwrap();
        let bad = Config::from_file(&path).unwrap_err();
        assert!(matches!(bad, ConfigError::ParseError(..)));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(vars(&[
                ("SCENARIO_LOCK_POLICY", "suppress"),
                ("SCENARIO_AUTO_INITIALIZE", "false"),
                ("SCENARIO_STORAGE_BACKEND", "journal"),
                ("SCENARIO_DATA", "/var/lib/scenario"),
                ("SCENARIO_FSYNC_POLICY", "every_n:16"),
                ("SCENARIO_COMPACTION_THRESHOLD", "500"),
                ("SCENARIO_LOG", "scenario_core=debug"),
            ]))
            .unwrap();

        assert_eq!(config.engine.lock_policy, LockPolicy::Suppress);
        assert!(!config.engine.auto_initialize);
        assert_eq!(config.storage.backend, StorageBackend::Journal);
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/scenario"));
        assert_eq!(config.storage.fsync_policy.to_string(), "every_n:16");
        assert_eq!(config.storage.compaction_threshold, 500);
        assert_eq!(config.logging.filter, "scenario_core=debug");
    }

    #[test]
    fn test_invalid_overrides() {
        for (name, value) in [
            ("SCENARIO_STORAGE_BACKEND", "mongo"),
            ("SCENARIO_LOCK_POLICY", "queue"),
            ("SCENARIO_FSYNC_POLICY", "sometimes"),
            ("SCENARIO_COMPACTION_THRESHOLD", "many"),
        ] {
            let err = Config::default()
                .apply_overrides(vars(&[(name, value)]))
                .unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError(_)), "{}", name);
        }
    }
}
