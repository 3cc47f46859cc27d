//! Configuration file support for the membership engine.
//!
//! Configuration is loaded from TOML. Every field has a default, so an empty
//! or missing file yields a working setup.

use crate::coordinator::CoordinatorSettings;
use crate::MAX_BATCH_SIZE;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_STORE_PATH: &str = "membership.json";
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Members per batch. Cannot exceed `MAX_BATCH_SIZE`.
    #[serde(default = "default_max_batch_size")]
    pub max_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Attempts per request before a capacity or version conflict is reported.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `env_logger` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: MAX_BATCH_SIZE,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

fn default_max_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_PATH)
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn load_from_file_or_default(path: &Path) -> Self {
        Self::load_from_file(path).unwrap_or_default()
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.max_size == 0 || self.batch.max_size > MAX_BATCH_SIZE {
            return Err(anyhow::anyhow!(
                "batch.max_size must be between 1 and {} (got {})",
                MAX_BATCH_SIZE,
                self.batch.max_size
            ));
        }
        if self.coordinator.max_attempts == 0 {
            return Err(anyhow::anyhow!("coordinator.max_attempts must be at least 1"));
        }
        Ok(())
    }

    #[must_use]
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            max_batch_size: self.batch.max_size,
            max_attempts: self.coordinator.max_attempts,
        }
    }
}
