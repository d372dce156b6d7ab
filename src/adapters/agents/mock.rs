//! Mock agent for testing and dry runs.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentCallOptions, AgentResponse, AgentStatus, PermissionMode, ProviderKind,
};
use crate::domain::ports::AgentCaller;

/// Scripted reply for one call.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: AgentStatus,
    pub content: String,
    pub structured_output: Option<serde_json::Value>,
    /// Fail the call with this message instead of replying
    pub error_message: Option<String>,
    /// Simulated latency
    pub delay: Option<Duration>,
}

impl Default for MockReply {
    fn default() -> Self {
        Self {
            status: AgentStatus::Done,
            content: "Mock task completed successfully.".to_string(),
            structured_output: None,
            error_message: None,
            delay: None,
        }
    }
}

impl MockReply {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_status(status: AgentStatus, content: impl Into<String>) -> Self {
        Self {
            status,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error_message: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_structured_output(mut self, value: serde_json::Value) -> Self {
        self.structured_output = Some(value);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A call as the mock received it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub persona: String,
    pub prompt: String,
    pub cwd: PathBuf,
    pub provider: ProviderKind,
    pub model: Option<String>,
    pub session_id: Option<String>,
    pub permission_mode: PermissionMode,
    pub allowed_tools: Option<Vec<String>>,
}

#[derive(Default)]
struct MockState {
    scripted: HashMap<String, VecDeque<MockReply>>,
    calls: Vec<RecordedCall>,
    sessions_started: usize,
}

/// Agent that answers from per-persona scripts and records every call.
///
/// Personas without a script left get the default reply. Calls without a
/// session id start a new session `mock-<persona>-<n>`; calls with one
/// resume it.
#[derive(Clone, Default)]
pub struct MockAgent {
    state: Arc<Mutex<MockState>>,
    default_reply: MockReply,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_reply(reply: MockReply) -> Self {
        Self {
            state: Arc::default(),
            default_reply: reply,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a reply for the next call made under `persona`.
    pub fn push(&self, persona: &str, reply: MockReply) {
        self.lock()
            .scripted
            .entry(persona.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Queue a `done` reply with the given content.
    pub fn push_reply(&self, persona: &str, content: &str) {
        self.push(persona, MockReply::success(content));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, persona: &str) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.persona == persona)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AgentCaller for MockAgent {
    async fn call(
        &self,
        persona: &str,
        prompt: &str,
        options: AgentCallOptions,
    ) -> DomainResult<AgentResponse> {
        let (reply, session_id) = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                persona: persona.to_string(),
                prompt: prompt.to_string(),
                cwd: options.cwd.clone(),
                provider: options.provider,
                model: options.model.clone(),
                session_id: options.session_id.clone(),
                permission_mode: options.permission_mode,
                allowed_tools: options.allowed_tools.clone(),
            });
            let reply = state
                .scripted
                .get_mut(persona)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| self.default_reply.clone());
            let session_id = match &options.session_id {
                Some(id) => id.clone(),
                None => {
                    state.sessions_started += 1;
                    format!("mock-{persona}-{}", state.sessions_started)
                }
            };
            (reply, session_id)
        };

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = reply.error_message {
            return Err(DomainError::AgentFailed {
                provider: options.provider.to_string(),
                message,
            });
        }

        options.emit(&reply.content);
        if !reply.content.ends_with('\n') {
            options.emit("\n");
        }

        let mut response =
            AgentResponse::new(persona, reply.status, reply.content).with_session(session_id);
        response.structured_output = reply.structured_output;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_default() {
        let agent = MockAgent::new();
        agent.push_reply("coder", "first");

        let options = AgentCallOptions::new("/tmp", ProviderKind::Mock);
        let first = agent.call("coder", "p1", options.clone()).await.unwrap();
        let second = agent.call("coder", "p2", options).await.unwrap();

        assert_eq!(first.content, "first");
        assert_eq!(second.content, "Mock task completed successfully.");
        assert_eq!(agent.calls_for("coder").len(), 2);
    }

    #[tokio::test]
    async fn test_session_resume() {
        let agent = MockAgent::new();
        let mut options = AgentCallOptions::new("/tmp", ProviderKind::Mock);
        let first = agent.call("coder", "p", options.clone()).await.unwrap();
        assert_eq!(first.session_id.as_deref(), Some("mock-coder-1"));

        options.session_id = first.session_id.clone();
        let resumed = agent.call("coder", "p", options).await.unwrap();
        assert_eq!(resumed.session_id, first.session_id);
    }

    #[tokio::test]
    async fn test_failure_reply() {
        let agent = MockAgent::new();
        agent.push("coder", MockReply::failure("rate limited"));
        let err = agent
            .call("coder", "p", AgentCallOptions::new("/tmp", ProviderKind::Mock))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_streams_content() {
        let agent = MockAgent::new();
        agent.push_reply("coder", "hello");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut options = AgentCallOptions::new("/tmp", ProviderKind::Mock);
        options.stream = Some(tx);

        agent.call("coder", "p", options).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx.recv().await.as_deref(), Some("\n"));
    }
}
