use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::provider::{PersonaProviderEntry, ProviderKind, ProviderProfile};

/// Main configuration structure for takt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Default provider for agent calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,

    /// Default model for agent calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Maximum number of tasks executed concurrently (1-32)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Idle delay between watcher polls
    #[serde(default = "default_watch_poll_interval_ms")]
    pub watch_poll_interval_ms: u64,

    /// Consecutive non-progressing executions that count as a loop
    #[serde(default = "default_loop_threshold")]
    pub loop_threshold: usize,

    /// Overrides every piece's `max_movements` when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_movements_override: Option<u32>,

    /// Piece used for tasks that name none
    #[serde(default = "default_piece")]
    pub default_piece: String,

    /// Task ledger, relative to the project directory
    #[serde(default = "default_tasks_file")]
    pub tasks_file: PathBuf,

    /// Project piece definitions, relative to the project directory
    #[serde(default = "default_pieces_dir")]
    pub pieces_dir: PathBuf,

    /// Parent directory for task worktrees, relative to the project directory
    #[serde(default = "default_worktree_dir")]
    pub worktree_dir: PathBuf,

    /// How long to wait for the task ledger lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_profiles: BTreeMap<ProviderKind, ProviderProfile>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub persona_providers: BTreeMap<String, PersonaProviderEntry>,

    #[serde(default)]
    pub claude: AgentBinaryConfig,

    #[serde(default = "AgentBinaryConfig::codex")]
    pub codex: AgentBinaryConfig,
}

const fn default_concurrency() -> usize {
    1
}

const fn default_watch_poll_interval_ms() -> u64 {
    2000
}

const fn default_loop_threshold() -> usize {
    3
}

fn default_piece() -> String {
    "default".to_string()
}

fn default_tasks_file() -> PathBuf {
    PathBuf::from(".takt/tasks.yaml")
}

fn default_pieces_dir() -> PathBuf {
    PathBuf::from(".takt/pieces")
}

fn default_worktree_dir() -> PathBuf {
    PathBuf::from(".takt/worktrees")
}

const fn default_lock_timeout_ms() -> u64 {
    30_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            concurrency: default_concurrency(),
            watch_poll_interval_ms: default_watch_poll_interval_ms(),
            loop_threshold: default_loop_threshold(),
            max_movements_override: None,
            default_piece: default_piece(),
            tasks_file: default_tasks_file(),
            pieces_dir: default_pieces_dir(),
            worktree_dir: default_worktree_dir(),
            lock_timeout_ms: default_lock_timeout_ms(),
            logging: LoggingConfig::default(),
            provider_profiles: BTreeMap::new(),
            persona_providers: BTreeMap::new(),
            claude: AgentBinaryConfig::default(),
            codex: AgentBinaryConfig::codex(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stderr only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Rotation for file logs: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Location of an agent CLI executable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentBinaryConfig {
    pub binary_path: String,
}

fn default_claude_path() -> String {
    "claude".to_string()
}

impl AgentBinaryConfig {
    fn codex() -> Self {
        Self {
            binary_path: "codex".to_string(),
        }
    }
}

impl Default for AgentBinaryConfig {
    fn default() -> Self {
        Self {
            binary_path: default_claude_path(),
        }
    }
}

/// Provider-related values from a single config file.
///
/// Resolution distinguishes project from global values, so each file is
/// also read on its own into one of these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProviderLayer {
    #[serde(default)]
    pub provider: Option<ProviderKind>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub provider_profiles: BTreeMap<ProviderKind, ProviderProfile>,

    #[serde(default)]
    pub persona_providers: BTreeMap<String, PersonaProviderEntry>,
}

/// Project and global provider layers, kept apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSettings {
    pub project: ProviderLayer,
    pub global: ProviderLayer,
}

impl ProviderSettings {
    /// Persona-level entry; project wins over global.
    pub fn persona_entry(&self, persona: &str) -> Option<&PersonaProviderEntry> {
        self.project
            .persona_providers
            .get(persona)
            .or_else(|| self.global.persona_providers.get(persona))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PermissionMode;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.loop_threshold, 3);
        assert_eq!(config.tasks_file, PathBuf::from(".takt/tasks.yaml"));
        assert_eq!(config.claude.binary_path, "claude");
        assert_eq!(config.codex.binary_path, "codex");
    }

    #[test]
    fn test_provider_layer_yaml() {
        let yaml = r"
provider: codex
model: gpt-5
provider_profiles:
  codex:
    default_permission_mode: edit
persona_providers:
  reviewer:
    provider: claude
    model: opus
";
        let layer: ProviderLayer = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(layer.provider, Some(ProviderKind::Codex));
        assert_eq!(
            layer.provider_profiles[&ProviderKind::Codex].default_permission_mode,
            Some(PermissionMode::Edit)
        );

        let settings = ProviderSettings {
            project: ProviderLayer::default(),
            global: layer,
        };
        let entry = settings.persona_entry("reviewer").unwrap();
        assert_eq!(entry.provider, Some(ProviderKind::Claude));
        assert!(settings.persona_entry("coder").is_none());
    }
}
