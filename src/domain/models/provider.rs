//! Provider and permission domain models.
//!
//! Providers are the agent backends a movement can run on. Permission modes
//! bound what the agent is allowed to do inside the working copy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Agent backend a movement is executed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Claude Code CLI
    Claude,
    /// OpenAI Codex CLI
    Codex,
    /// Scripted in-process backend for tests and dry runs
    Mock,
}

impl Default for ProviderKind {
    fn default() -> Self {
        Self::Claude
    }
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Mock => "mock",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "claude" | "claude_code" | "claude-code" => Some(Self::Claude),
            "codex" => Some(Self::Codex),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an agent may do while executing a movement.
///
/// Variants are declared in ascending order of privilege so the derived
/// `Ord` gives `Readonly < Edit < Full`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Read files only
    Readonly,
    /// Read and edit files in the working copy
    Edit,
    /// Unrestricted, including shell commands
    Full,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Readonly => "readonly",
            Self::Edit => "edit",
            Self::Full => "full",
        }
    }

    /// Raise `self` to at least `floor`. Never lowers.
    pub fn at_least(self, floor: Self) -> Self {
        self.max(floor)
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-provider permission settings from a config layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Mode used for every movement without an explicit override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_permission_mode: Option<PermissionMode>,

    /// Per-movement overrides keyed by movement name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub movement_permission_overrides: BTreeMap<String, PermissionMode>,
}

/// Persona-level provider override from config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaProviderEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_ordering() {
        assert!(PermissionMode::Readonly < PermissionMode::Edit);
        assert!(PermissionMode::Edit < PermissionMode::Full);
        assert_eq!(
            PermissionMode::Readonly.at_least(PermissionMode::Edit),
            PermissionMode::Edit
        );
        assert_eq!(
            PermissionMode::Full.at_least(PermissionMode::Edit),
            PermissionMode::Full
        );
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!(ProviderKind::from_str("Claude"), Some(ProviderKind::Claude));
        assert_eq!(ProviderKind::from_str("claude-code"), Some(ProviderKind::Claude));
        assert_eq!(ProviderKind::from_str("codex"), Some(ProviderKind::Codex));
        assert_eq!(ProviderKind::from_str("gpt"), None);
    }

    #[test]
    fn test_profile_yaml() {
        let yaml = r"
default_permission_mode: edit
movement_permission_overrides:
  implement: full
";
        let profile: ProviderProfile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(profile.default_permission_mode, Some(PermissionMode::Edit));
        assert_eq!(
            profile.movement_permission_overrides.get("implement"),
            Some(&PermissionMode::Full)
        );
    }
}
