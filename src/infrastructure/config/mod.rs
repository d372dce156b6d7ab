//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - global and project YAML files
//! - Environment variable overrides
//! - Configuration validation
//! - Per-file provider layers for provider/permission resolution

pub mod loader;

pub use loader::{ConfigError, ConfigLoader, CONFIG_FILE, TAKT_DIR};
