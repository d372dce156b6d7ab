//! OpenAI Codex CLI agent (`codex exec --json`).

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::process::run_json_lines;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentCallOptions, AgentResponse, AgentStatus, PermissionMode, ProviderKind,
};
use crate::domain::ports::AgentCaller;

#[derive(Debug, Clone)]
pub struct CodexConfig {
    pub binary_path: String,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            binary_path: "codex".to_string(),
        }
    }
}

pub struct CodexAgent {
    config: CodexConfig,
}

#[derive(Debug, Default)]
struct StreamState {
    messages: Vec<String>,
    thread_id: Option<String>,
    error: Option<String>,
}

impl CodexAgent {
    pub fn new(config: CodexConfig) -> Self {
        Self { config }
    }

    fn sandbox(mode: PermissionMode) -> &'static str {
        match mode {
            PermissionMode::Readonly => "read-only",
            PermissionMode::Edit => "workspace-write",
            PermissionMode::Full => "danger-full-access",
        }
    }

    fn build_args(prompt: &str, options: &AgentCallOptions, schema_file: Option<&PathBuf>) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "--json".to_string(),
            "--skip-git-repo-check".to_string(),
            "--sandbox".to_string(),
            Self::sandbox(options.permission_mode).to_string(),
        ];

        if let Some(model) = &options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if let Some(path) = schema_file {
            args.push("--output-schema".to_string());
            args.push(path.display().to_string());
        }

        if let Some(session_id) = &options.session_id {
            args.push("resume".to_string());
            args.push(session_id.clone());
        }

        args.push(prompt.to_string());
        args
    }

    fn apply_event(state: &mut StreamState, line: &str) -> Option<String> {
        let json: serde_json::Value = serde_json::from_str(line).ok()?;
        match json.get("type").and_then(|t| t.as_str())? {
            "thread.started" => {
                state.thread_id = json.get("thread_id").and_then(|t| t.as_str()).map(str::to_string);
                None
            }
            "item.completed" => {
                let item = json.get("item")?;
                if item.get("type").and_then(|t| t.as_str()) != Some("agent_message") {
                    return None;
                }
                let text = item.get("text").and_then(|t| t.as_str())?.to_string();
                state.messages.push(text.clone());
                Some(format!("{text}\n"))
            }
            "turn.failed" | "error" => {
                state.error = json
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .or_else(|| json.get("message"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .or_else(|| Some("codex reported an error".to_string()));
                None
            }
            _ => None,
        }
    }
}

impl Default for CodexAgent {
    fn default() -> Self {
        Self::new(CodexConfig::default())
    }
}

#[async_trait]
impl AgentCaller for CodexAgent {
    #[instrument(skip(self, prompt, options), fields(cwd = %options.cwd.display(), model = ?options.model))]
    async fn call(
        &self,
        persona: &str,
        prompt: &str,
        options: AgentCallOptions,
    ) -> DomainResult<AgentResponse> {
        let schema_file = match &options.output_schema {
            Some(schema) => {
                let path = std::env::temp_dir().join(format!("takt-schema-{}.json", Uuid::new_v4()));
                tokio::fs::write(&path, schema.to_string()).await.map_err(|e| {
                    DomainError::AgentFailed {
                        provider: ProviderKind::Codex.to_string(),
                        message: format!("failed to write output schema: {e}"),
                    }
                })?;
                Some(path)
            }
            None => None,
        };

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.args(Self::build_args(prompt, &options, schema_file.as_ref()))
            .current_dir(&options.cwd);

        let mut state = StreamState::default();
        let result = run_json_lines(cmd, ProviderKind::Codex, |line| {
            if let Some(chunk) = Self::apply_event(&mut state, line) {
                options.emit(&chunk);
            }
        })
        .await;

        if let Some(path) = &schema_file {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(path = %path.display(), error = %e, "failed to remove schema file");
            }
        }
        result?;

        if let Some(message) = state.error {
            return Err(DomainError::AgentFailed {
                provider: ProviderKind::Codex.to_string(),
                message,
            });
        }
        debug!(thread = ?state.thread_id, "codex call finished");

        let content = state.messages.join("\n");
        let structured_output = options
            .output_schema
            .as_ref()
            .and_then(|_| state.messages.last())
            .and_then(|last| serde_json::from_str(last).ok());

        let mut response = AgentResponse::new(persona, AgentStatus::Done, content);
        response.session_id = state.thread_id.or(options.session_id);
        response.structured_output = structured_output;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_args() {
        let mut options = AgentCallOptions::new("/tmp", ProviderKind::Codex);
        options.permission_mode = PermissionMode::Edit;
        options.model = Some("gpt-5".to_string());
        options.session_id = Some("t-9".to_string());

        let args = CodexAgent::build_args("fix it", &options, None);
        let joined = args.join(" ");
        assert!(joined.starts_with("exec --json"));
        assert!(joined.contains("--sandbox workspace-write"));
        assert!(joined.contains("--model gpt-5"));
        assert!(joined.ends_with("resume t-9 fix it"));
    }

    #[test]
    fn test_apply_events() {
        let mut state = StreamState::default();
        CodexAgent::apply_event(
            &mut state,
            &json!({"type": "thread.started", "thread_id": "t-1"}).to_string(),
        );
        let chunk = CodexAgent::apply_event(
            &mut state,
            &json!({"type": "item.completed", "item": {"type": "agent_message", "text": "[FIX:1]"}})
                .to_string(),
        );
        assert_eq!(chunk.as_deref(), Some("[FIX:1]\n"));
        assert_eq!(state.thread_id.as_deref(), Some("t-1"));

        CodexAgent::apply_event(
            &mut state,
            &json!({"type": "turn.failed", "error": {"message": "quota"}}).to_string(),
        );
        assert_eq!(state.error.as_deref(), Some("quota"));
    }
}
