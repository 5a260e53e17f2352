//! Sync engine configuration using Figment
//!
//! Sources in precedence order (later ones override earlier ones):
//! 1. Built-in defaults
//! 2. An optional TOML, YAML or JSON file, chosen by extension
//! 3. Environment variables prefixed with `TASKFLOW_`

use crate::error::{KanbanError, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Prefix for environment overrides, e.g. `TASKFLOW_PERSIST_TIMEOUT_MS`
pub const ENV_PREFIX: &str = "TASKFLOW_";

/// Tunables of the optimistic sync coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound for one repository call; hitting it counts as a failure
    pub persist_timeout_ms: u64,
    /// Buffer size of the model event channel
    pub event_capacity: usize,
    /// Append every resolution as a JSON line to this file
    pub completion_log: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            persist_timeout_ms: 10_000,
            event_capacity: 256,
            completion_log: None,
        }
    }
}

impl SyncConfig {
    /// Load from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(KanbanError::config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            debug!(path = %path.display(), "loading sync config file");
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => figment.merge(Toml::file(path)),
                Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => {
                    return Err(KanbanError::config(format!(
                        "unsupported config format: {}",
                        path.display()
                    )))
                }
            };
        }

        let config: Self = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.persist_timeout_ms == 0 {
            return Err(KanbanError::config("persist_timeout_ms must be positive"));
        }
        if self.event_capacity == 0 {
            return Err(KanbanError::config("event_capacity must be positive"));
        }
        Ok(())
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }

    pub fn with_persist_timeout(mut self, timeout: Duration) -> Self {
        self.persist_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_defaults() {
        let config = SyncConfig::load(None).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.persist_timeout(), Duration::from_secs(10));
    }

    #[test]
    #[serial]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.toml");
        fs::write(&path, "persist_timeout_ms = 250\n").unwrap();

        let config = SyncConfig::load(Some(&path)).unwrap();
        assert_eq!(config.persist_timeout_ms, 250);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    #[serial]
    fn test_yaml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.yaml");
        fs::write(&path, "event_capacity: 8\ncompletion_log: /tmp/resolutions.jsonl\n").unwrap();

        let config = SyncConfig::load(Some(&path)).unwrap();
        assert_eq!(config.event_capacity, 8);
        assert_eq!(config.completion_log, Some(PathBuf::from("/tmp/resolutions.jsonl")));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.json");
        fs::write(&path, r#"{"persist_timeout_ms": 250}"#).unwrap();

        std::env::set_var("TASKFLOW_PERSIST_TIMEOUT_MS", "75");
        let config = SyncConfig::load(Some(&path));
        std::env::remove_var("TASKFLOW_PERSIST_TIMEOUT_MS");

        assert_eq!(config.unwrap().persist_timeout_ms, 75);
    }

    #[test]
    #[serial]
    fn test_rejects_zero_timeout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.toml");
        fs::write(&path, "persist_timeout_ms = 0\n").unwrap();

        let err = SyncConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, KanbanError::Config { .. }));
    }

    #[test]
    #[serial]
    fn test_missing_and_unknown_files() {
        let dir = TempDir::new().unwrap();
        assert!(SyncConfig::load(Some(&dir.path().join("absent.toml"))).is_err());

        let ini = dir.path().join("sync.ini");
        fs::write(&ini, "x=1").unwrap();
        assert!(SyncConfig::load(Some(&ini)).is_err());
    }
}
