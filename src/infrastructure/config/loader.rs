use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::models::config::{Config, ProviderLayer, ProviderSettings};

/// Name of the per-user and per-project configuration directory.
pub const TAKT_DIR: &str = ".takt";
/// Configuration file inside a `.takt` directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid concurrency: {0}. Must be between 1 and 32")]
    InvalidConcurrency(usize),

    #[error("Invalid loop_threshold: {0}. Must be at least 2")]
    InvalidLoopThreshold(usize),

    #[error("Invalid watch_poll_interval_ms: {0}. Must be positive")]
    InvalidPollInterval(u64),

    #[error("Invalid lock_timeout_ms: {0}. Must be positive")]
    InvalidLockTimeout(u64),

    #[error("Invalid max_movements_override: {0}. Must be at least 1")]
    InvalidMaxMovements(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Per-user directory: `$TAKT_HOME`, else `~/.takt`.
    pub fn global_dir() -> Option<PathBuf> {
        match std::env::var_os("TAKT_HOME") {
            Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
            _ => dirs::home_dir().map(|home| home.join(TAKT_DIR)),
        }
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    pub fn project_config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(TAKT_DIR).join(CONFIG_FILE)
    }

    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. Global config (`~/.takt/config.yaml`)
    /// 3. Project config (`<project>/.takt/config.yaml`)
    /// 4. Environment variables (TAKT_* prefix, `__` for nesting)
    pub fn load(project_dir: &Path) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(global) = Self::global_config_path() {
            figment = figment.merge(Yaml::file(global));
        }
        let config: Config = figment
            .merge(Yaml::file(Self::project_config_path(project_dir)))
            .merge(Env::prefixed("TAKT_").ignore(&["home"]).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Provider values of the project and global files, each read alone.
    pub fn load_provider_settings(project_dir: &Path) -> Result<ProviderSettings> {
        let global = match Self::global_config_path() {
            Some(path) => Self::load_layer(&path)?,
            None => ProviderLayer::default(),
        };
        Ok(ProviderSettings {
            project: Self::load_layer(&Self::project_config_path(project_dir))?,
            global,
        })
    }

    /// A missing file is an empty layer.
    fn load_layer(path: &Path) -> Result<ProviderLayer> {
        Figment::new()
            .merge(Yaml::file(path))
            .extract()
            .context(format!("Failed to read provider settings from {}", path.display()))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.concurrency == 0 || config.concurrency > 32 {
            return Err(ConfigError::InvalidConcurrency(config.concurrency));
        }

        if config.loop_threshold < 2 {
            return Err(ConfigError::InvalidLoopThreshold(config.loop_threshold));
        }

        if config.watch_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(config.watch_poll_interval_ms));
        }

        if config.lock_timeout_ms == 0 {
            return Err(ConfigError::InvalidLockTimeout(config.lock_timeout_ms));
        }

        if config.max_movements_override == Some(0) {
            return Err(ConfigError::InvalidMaxMovements(0));
        }

        if config.default_piece.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "default_piece cannot be empty".to_string(),
            ));
        }

        if config.tasks_file.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "tasks_file cannot be empty".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        for (name, binary) in [("claude", &config.claude), ("codex", &config.codex)] {
            if binary.binary_path.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{name}.binary_path cannot be empty"
                )));
            }
        }

        Ok(())
    }
}
