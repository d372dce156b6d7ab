//! Claude Code CLI agent.
//!
//! Spawns `claude --print --output-format stream-json` per call and reads
//! its event stream for text, the session id and structured output.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::process::run_json_lines;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentCallOptions, AgentResponse, AgentStatus, PermissionMode, ProviderKind,
};
use crate::domain::ports::AgentCaller;

/// Every built-in tool, used to deny all tools when the allow-list is empty.
const ALL_TOOLS: &str =
    "Bash,Edit,Write,MultiEdit,NotebookEdit,Read,Glob,Grep,WebFetch,WebSearch,Task,TodoWrite";

#[derive(Debug, Clone)]
pub struct ClaudeCodeConfig {
    /// Path to claude CLI binary
    pub binary_path: String,
    /// Additional CLI flags
    pub extra_flags: Vec<String>,
}

impl Default for ClaudeCodeConfig {
    fn default() -> Self {
        Self {
            binary_path: "claude".to_string(),
            extra_flags: vec![],
        }
    }
}

pub struct ClaudeCodeAgent {
    config: ClaudeCodeConfig,
}

/// What the event stream told us.
#[derive(Debug, Default)]
struct StreamState {
    text: String,
    result: Option<String>,
    session_id: Option<String>,
    structured_output: Option<serde_json::Value>,
    error: Option<String>,
}

impl ClaudeCodeAgent {
    pub fn new(config: ClaudeCodeConfig) -> Self {
        Self { config }
    }

    fn permission_flag(mode: PermissionMode) -> &'static str {
        match mode {
            PermissionMode::Readonly => "default",
            PermissionMode::Edit => "acceptEdits",
            PermissionMode::Full => "bypassPermissions",
        }
    }

    /// Build CLI arguments for a call.
    fn build_args(&self, persona: &str, prompt: &str, options: &AgentCallOptions) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--verbose".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--permission-mode".to_string(),
            Self::permission_flag(options.permission_mode).to_string(),
        ];

        if let Some(session_id) = &options.session_id {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }

        if let Some(model) = &options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if !persona.is_empty() {
            args.push("--append-system-prompt".to_string());
            args.push(format!("You are acting as the '{persona}' persona."));
        }

        match options.allowed_tools.as_deref() {
            Some([]) => {
                args.push("--disallowedTools".to_string());
                args.push(ALL_TOOLS.to_string());
            }
            Some(tools) => {
                args.push("--allowedTools".to_string());
                args.push(tools.join(","));
            }
            None => {}
        }

        if let Some(schema) = &options.output_schema {
            args.push("--json-schema".to_string());
            args.push(schema.to_string());
        }

        args.extend(self.config.extra_flags.iter().cloned());

        args.push("-p".to_string());
        args.push(prompt.to_string());
        args
    }

    /// Fold one stream-json event into the state, returning new text.
    fn apply_event(state: &mut StreamState, line: &str) -> Option<String> {
        let Ok(json) = serde_json::from_str::<serde_json::Value>(line) else {
            // plain text output
            state.text.push_str(line);
            state.text.push('\n');
            return Some(format!("{line}\n"));
        };

        if let Some(id) = json.get("session_id").and_then(|s| s.as_str()) {
            state.session_id = Some(id.to_string());
        }

        match json.get("type").and_then(|t| t.as_str())? {
            "assistant" => {
                let blocks = json.get("message")?.get("content")?.as_array()?;
                let text: String = blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n");
                if text.is_empty() {
                    return None;
                }
                state.text.push_str(&text);
                state.text.push('\n');
                Some(format!("{text}\n"))
            }
            "result" => {
                if json.get("is_error").and_then(|e| e.as_bool()).unwrap_or(false) {
                    state.error = json
                        .get("result")
                        .and_then(|r| r.as_str())
                        .map(str::to_string)
                        .or_else(|| Some("claude reported an error".to_string()));
                }
                state.result = json.get("result").and_then(|r| r.as_str()).map(str::to_string);
                state.structured_output = json.get("structured_output").cloned();
                None
            }
            "error" => {
                state.error = json
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .or_else(|| json.get("message"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string);
                None
            }
            _ => None,
        }
    }
}

impl Default for ClaudeCodeAgent {
    fn default() -> Self {
        Self::new(ClaudeCodeConfig::default())
    }
}

#[async_trait]
impl AgentCaller for ClaudeCodeAgent {
    #[instrument(skip(self, prompt, options), fields(cwd = %options.cwd.display(), model = ?options.model))]
    async fn call(
        &self,
        persona: &str,
        prompt: &str,
        options: AgentCallOptions,
    ) -> DomainResult<AgentResponse> {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.args(self.build_args(persona, prompt, &options))
            .current_dir(&options.cwd);

        let mut state = StreamState::default();
        run_json_lines(cmd, ProviderKind::Claude, |line| {
            if let Some(chunk) = Self::apply_event(&mut state, line) {
                options.emit(&chunk);
            }
        })
        .await?;

        if let Some(message) = state.error {
            return Err(DomainError::AgentFailed {
                provider: ProviderKind::Claude.to_string(),
                message,
            });
        }
        debug!(session = ?state.session_id, "claude call finished");

        let content = state.result.unwrap_or(state.text);
        let mut response = AgentResponse::new(persona, AgentStatus::Done, content.trim());
        response.session_id = state.session_id.or(options.session_id);
        response.structured_output = state.structured_output;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_args_resume_and_readonly_tools() {
        let agent = ClaudeCodeAgent::default();
        let mut options = AgentCallOptions::new("/tmp", ProviderKind::Claude);
        options.session_id = Some("abc".to_string());
        options.model = Some("opus".to_string());
        options.allowed_tools = Some(vec![]);

        let args = agent.build_args("reviewer", "judge this", &options);
        let joined = args.join(" ");
        assert!(joined.contains("--resume abc"));
        assert!(joined.contains("--model opus"));
        assert!(joined.contains("--permission-mode default"));
        assert!(joined.contains("--disallowedTools"));
        assert_eq!(args.last().map(String::as_str), Some("judge this"));
    }

    #[test]
    fn test_build_args_permission_and_schema() {
        let agent = ClaudeCodeAgent::default();
        let mut options = AgentCallOptions::new("/tmp", ProviderKind::Claude);
        options.permission_mode = PermissionMode::Full;
        options.allowed_tools = Some(vec!["Read".to_string(), "Grep".to_string()]);
        options.output_schema = Some(json!({"type": "object"}));

        let joined = agent.build_args("coder", "go", &options).join(" ");
        assert!(joined.contains("--permission-mode bypassPermissions"));
        assert!(joined.contains("--allowedTools Read,Grep"));
        assert!(joined.contains("--json-schema"));
    }

    #[test]
    fn test_apply_events() {
        let mut state = StreamState::default();
        let init = json!({"type": "system", "subtype": "init", "session_id": "s-1"}).to_string();
        assert!(ClaudeCodeAgent::apply_event(&mut state, &init).is_none());

        let text = json!({
            "type": "assistant",
            "message": {"content": [{"type": "text", "text": "Done. [PLAN:1]"}]}
        })
        .to_string();
        assert_eq!(
            ClaudeCodeAgent::apply_event(&mut state, &text).as_deref(),
            Some("Done. [PLAN:1]\n")
        );

        let result = json!({
            "type": "result",
            "result": "Done. [PLAN:1]",
            "session_id": "s-1",
            "structured_output": {"step": 1}
        })
        .to_string();
        ClaudeCodeAgent::apply_event(&mut state, &result);

        assert_eq!(state.session_id.as_deref(), Some("s-1"));
        assert_eq!(state.result.as_deref(), Some("Done. [PLAN:1]"));
        assert_eq!(state.structured_output, Some(json!({"step": 1})));
        assert!(state.error.is_none());
    }

    #[test]
    fn test_apply_error_result() {
        let mut state = StreamState::default();
        let line = json!({"type": "result", "is_error": true, "result": "overloaded"}).to_string();
        ClaudeCodeAgent::apply_event(&mut state, &line);
        assert_eq!(state.error.as_deref(), Some("overloaded"));
    }
}
