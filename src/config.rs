//! Hub configuration
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! TOML file, the `FURNACE_DB` / `FURNACE_PORT` environment variables, and
//! finally command-line flags (applied by the binary).

use crate::activations::hierarchy::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DB_ENV: &str = "FURNACE_DB";
pub const PORT_ENV: &str = "FURNACE_PORT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// SQLite database file, created on first start
    pub db_path: PathBuf,
    /// WebSocket port, bound on 127.0.0.1
    pub port: u16,
    pub max_page_size: u32,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".furnace").join("furnace.db"),
            port: 4455,
            max_page_size: 500,
            max_connections: 5,
            busy_timeout_ms: 5000,
        }
    }
}

impl HubConfig {
    /// Defaults, overlaid with `file` when given, then with the environment
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env(|var| std::env::var(var).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides through `lookup`
    pub fn with_env(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(db) = lookup(DB_ENV).filter(|v| !v.is_empty()) {
            self.db_path = PathBuf::from(db);
        }
        if let Some(port) = lookup(PORT_ENV).filter(|v| !v.is_empty()) {
            self.port = port.parse().map_err(|_| ConfigError::Env {
                var: PORT_ENV,
                value: port,
            })?;
        }
        Ok(self)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            db_path: self.db_path.clone(),
            max_page_size: self.max_page_size,
            max_connections: self.max_connections,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("furnace.toml");
        std::fs::write(&path, "port = 5000\nmax_page_size = 100\n").unwrap();

        let config = HubConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.db_path, HubConfig::default().db_path);
        assert_eq!(config.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_bad_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();

        let err = HubConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));

        let missing = HubConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let config = HubConfig::default()
            .with_env(|var| match var {
                DB_ENV => Some("/tmp/other.db".to_string()),
                PORT_ENV => Some("6001".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.port, 6001);

        let err = HubConfig::default()
            .with_env(|var| (var == PORT_ENV).then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: PORT_ENV, .. }));
    }

    #[test]
    fn test_store_config_conversion() {
        let store = HubConfig::default().store_config();
        assert_eq!(store.max_connections, 5);
        assert_eq!(store.busy_timeout, Duration::from_millis(5000));
    }
}
