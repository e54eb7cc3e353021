//! Configuration file loader.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::watcher::WatchHooks;

use super::WatcherConfig;

/// Watcher settings loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Readability retry delay in milliseconds.
    pub open_retry_delay_ms: u64,
    /// History depth used when a caller does not pick one.
    pub default_depth: usize,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            open_retry_delay_ms: 1000,
            default_depth: 3,
        }
    }
}

impl WatcherSettings {
    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero intervals or a zero depth.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be greater than 0".into()));
        }
        if self.open_retry_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "open_retry_delay_ms must be greater than 0".into(),
            ));
        }
        if self.default_depth == 0 {
            return Err(ConfigError::Invalid("default_depth must be greater than 0".into()));
        }
        Ok(())
    }

    /// Build the runtime config with the given loop callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if validation fails.
    pub fn into_config(self, hooks: Arc<dyn WatchHooks>) -> Result<WatcherConfig, ConfigError> {
        self.validate()?;
        Ok(WatcherConfig::new(Duration::from_millis(self.poll_interval_ms))
            .with_open_retry_delay(Duration::from_millis(self.open_retry_delay_ms))
            .with_hooks(hooks))
    }
}

/// Settings loader that searches multiple locations.
#[derive(Debug)]
pub struct SettingsLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl SettingsLoader {
    /// Create a loader with the default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        // 1. Current directory: .cyclic-watch.toml
        search_paths.push(PathBuf::from(".cyclic-watch.toml"));

        // 2. User config directory: ~/.config/cyclic-watch/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("cyclic-watch").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Create a loader for one specific file.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load settings from the first existing file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<WatcherSettings, ConfigError> {
        if let Some(path) = self.find_config_file() {
            tracing::debug!(path = %path.display(), "Loading settings file");
            return Self::load_from_path(&path);
        }

        tracing::debug!("No settings file found, using defaults");
        Ok(WatcherSettings::default())
    }

    fn load_from_path(path: &Path) -> Result<WatcherSettings, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the search paths for debugging.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find the first settings file that exists.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
