//! Task domain model.
//!
//! Tasks are queued units of work, each driven through a piece by one
//! engine run. Records are mutated only through the lifecycle service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::domain::errors::{DomainError, DomainResult};

const MAX_SLUG_LEN: usize = 30;

/// Status of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed
    Pending,
    /// Claimed by a process and executing
    Running,
    /// Piece run finished successfully
    Completed,
    /// Piece run failed; can be requeued
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a failed task stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement: Option<String>,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Worktree isolation requested for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorktreeSetting {
    /// `true`: isolate in an automatically placed worktree
    Enabled(bool),
    /// Explicit worktree path
    Path(PathBuf),
}

impl WorktreeSetting {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Enabled(false))
    }
}

/// Durable record of a queued task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: String,
    pub status: TaskStatus,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub piece: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<WorktreeSetting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_movement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_note: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_pr: bool,
    /// Identity of the claiming process while `running`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Create a pending record from a validated spec.
    pub fn from_spec(name: impl Into<String>, spec: TaskSpec) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Pending,
            content: spec.content,
            piece: spec.piece,
            worktree: spec.worktree.filter(WorktreeSetting::is_enabled),
            branch: spec.branch,
            issue: spec.issue,
            start_movement: spec.start_movement,
            retry_note: spec.retry_note,
            auto_pr: spec.auto_pr,
            owner_pid: None,
            failure: None,
            response: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn uses_worktree(&self) -> bool {
        self.worktree.is_some()
    }
}

/// Options accepted when adding a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSpec {
    pub content: String,
    pub piece: Option<String>,
    pub worktree: Option<WorktreeSetting>,
    pub branch: Option<String>,
    pub issue: Option<u32>,
    pub start_movement: Option<String>,
    pub retry_note: Option<String>,
    pub auto_pr: bool,
}

impl TaskSpec {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.content.trim().is_empty() {
            return Err(DomainError::InvalidTaskInput("task content cannot be empty".to_string()));
        }
        if self.issue == Some(0) {
            return Err(DomainError::InvalidTaskInput(
                "issue must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    /// Base name for the record: a slug of the first content line.
    pub fn slug(&self) -> String {
        slugify(self.content.lines().next().unwrap_or_default())
    }
}

/// Task file fields consumed on `add`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFileInput {
    pub task: String,
    #[serde(default)]
    pub worktree: Option<WorktreeSetting>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default, alias = "workflow")]
    pub piece: Option<String>,
    #[serde(default)]
    pub issue: Option<i64>,
    #[serde(default, alias = "startMovement")]
    pub start_movement: Option<String>,
    #[serde(default, alias = "retryNote")]
    pub retry_note: Option<String>,
    #[serde(default, alias = "autoPr")]
    pub auto_pr: Option<bool>,
}

impl TaskFileInput {
    /// Parse a YAML (or JSON) task file.
    pub fn parse(text: &str) -> DomainResult<Self> {
        serde_yaml::from_str(text).map_err(|e| DomainError::InvalidTaskInput(e.to_string()))
    }
}

impl TryFrom<TaskFileInput> for TaskSpec {
    type Error = DomainError;

    fn try_from(input: TaskFileInput) -> DomainResult<Self> {
        let issue = match input.issue {
            None => None,
            Some(n) if n > 0 => Some(u32::try_from(n).map_err(|_| {
                DomainError::InvalidTaskInput(format!("issue {n} is out of range"))
            })?),
            Some(n) => {
                return Err(DomainError::InvalidTaskInput(format!(
                    "issue must be a positive integer, got {n}"
                )));
            }
        };

        let spec = TaskSpec {
            content: input.task,
            piece: input.piece,
            worktree: input.worktree,
            branch: input.branch,
            issue,
            start_movement: input.start_movement,
            retry_note: input.retry_note,
            auto_pr: input.auto_pr.unwrap_or(false),
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// What a finished run reports back to the lifecycle service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExecutionResult {
    pub name: String,
    /// Human-readable response persisted on the record
    pub response: String,
    pub error: Option<String>,
    pub movement: Option<String>,
    pub last_message: Option<String>,
}

/// Lowercase ASCII slug: alphanumerics separated by single dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}
