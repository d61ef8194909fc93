//! Runner Configuration
//!
//! Handles parsing and management of bmi.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ffi::LibraryLocator;

/// Name of the configuration file searched for by [`RunnerConfig::find_and_load`].
pub const CONFIG_FILE: &str = "bmi.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching bmi.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RunnerConfig {
    /// Model to run
    #[serde(default)]
    pub model: ModelConfig,

    /// Library search
    #[serde(default)]
    pub library: LibraryConfig,

    /// Time loop and logging
    #[serde(default)]
    pub run: RunConfig,
}

impl RunnerConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: RunnerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Locator for `engine` with the configured extra search paths.
    pub fn locator(&self, engine: &str) -> LibraryLocator {
        let mut locator = LibraryLocator::new(engine);
        for path in &self.library.search_paths {
            locator.add_search_path(path);
        }
        locator
    }
}

/// The model to run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelConfig {
    /// Engine name or library path
    #[serde(default)]
    pub engine: Option<String>,

    /// Model configuration file handed to initialize
    #[serde(default)]
    pub config: Option<PathBuf>,
}

/// Library search settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LibraryConfig {
    /// Searched after the library path variable, before the system directories
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

/// Run loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Time step; the model's own step when unset
    #[serde(default)]
    pub time_step: Option<f64>,

    /// Stop time; the model's end time when unset
    #[serde(default)]
    pub end_time: Option<f64>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Route the model's own log messages to the runner log
    #[serde(default = "default_true")]
    pub forward_native_logs: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            time_step: None,
            end_time: None,
            log_level: default_log_level(),
            forward_native_logs: true,
        }
    }
}
