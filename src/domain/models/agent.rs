//! Agent call domain models.
//!
//! An agent call runs one persona against one prompt on one provider and
//! yields an `AgentResponse`. Responses are read-only to the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

use super::provider::{PermissionMode, ProviderKind};

/// Incremental agent output, one text chunk at a time.
pub type StreamSender = mpsc::UnboundedSender<String>;

/// Status reported with an agent response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    #[default]
    Done,
    Blocked,
    Approved,
    Rejected,
    Improve,
    Cancelled,
    Interrupted,
    Answer,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Blocked => "blocked",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Improve => "improve",
            Self::Cancelled => "cancelled",
            Self::Interrupted => "interrupted",
            Self::Answer => "answer",
        }
    }
}

/// Response produced by the external agent collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub persona: String,
    pub status: AgentStatus,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl AgentResponse {
    pub fn new(persona: impl Into<String>, status: AgentStatus, content: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            status,
            content: content.into(),
            session_id: None,
            structured_output: None,
            timestamp: Utc::now(),
        }
    }

    pub fn done(persona: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(persona, AgentStatus::Done, content)
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_structured_output(mut self, value: serde_json::Value) -> Self {
        self.structured_output = Some(value);
        self
    }
}

/// Options for a single agent call.
#[derive(Debug, Clone)]
pub struct AgentCallOptions {
    pub cwd: PathBuf,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub provider: ProviderKind,
    /// `Some(vec![])` forbids every tool
    pub allowed_tools: Option<Vec<String>>,
    pub permission_mode: PermissionMode,
    pub output_schema: Option<serde_json::Value>,
    pub stream: Option<StreamSender>,
}

impl AgentCallOptions {
    pub fn new(cwd: impl Into<PathBuf>, provider: ProviderKind) -> Self {
        Self {
            cwd: cwd.into(),
            session_id: None,
            model: None,
            provider,
            allowed_tools: None,
            permission_mode: PermissionMode::Readonly,
            output_schema: None,
            stream: None,
        }
    }

    /// Forward a chunk to the stream callback, if any.
    pub fn emit(&self, chunk: &str) {
        if let Some(tx) = &self.stream {
            let _ = tx.send(chunk.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_defaults_to_done() {
        assert_eq!(AgentStatus::default(), AgentStatus::Done);
        let status: AgentStatus = serde_json::from_str("\"improve\"").unwrap();
        assert_eq!(status.as_str(), "improve");
    }
}
