use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Main configuration structure for Spanscope.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file is missing.
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "Failed to load config from {:?}: {}. Using defaults.",
                    path.as_ref(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Get the default configuration as a TOML string.
    pub fn default_toml() -> Result<String> {
        let config = Self::default();
        toml::to_string_pretty(&config).context("Failed to serialize default config")
    }

    /// Validate the configuration for obvious misconfiguration.
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.engine.validate()?;

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("Invalid log level: {}", other),
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("Failed to parse config")?;
        Ok(config)
    }
}

/// Retention limits for the store's view lists.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_service_span_count")]
    pub max_service_span_count: usize,

    #[serde(default = "default_max_log_count")]
    pub max_log_count: usize,

    #[serde(default = "default_max_metric_count")]
    pub max_metric_count: usize,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_service_span_count == 0 {
            anyhow::bail!("max_service_span_count must be greater than 0");
        }
        if self.max_log_count == 0 {
            anyhow::bail!("max_log_count must be greater than 0");
        }
        if self.max_metric_count == 0 {
            anyhow::bail!("max_metric_count must be greater than 0");
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_service_span_count: default_max_service_span_count(),
            max_log_count: default_max_log_count(),
            max_metric_count: default_max_metric_count(),
        }
    }
}

/// Ingest engine tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            anyhow::bail!("engine buffer_size must be greater than 0");
        }
        if self.batch_size == 0 {
            anyhow::bail!("engine batch_size must be greater than 0");
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub include_modules: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            include_modules: false,
        }
    }
}

// Default providers ---------------------------------------------------------

fn default_max_service_span_count() -> usize {
    1_000
}

fn default_max_log_count() -> usize {
    1_000
}

fn default_max_metric_count() -> usize {
    3_000
}

fn default_buffer_size() -> usize {
    1_024
}

fn default_batch_size() -> usize {
    64
}

fn default_flush_interval() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

// Tests ---------------------------------------------------------------------
