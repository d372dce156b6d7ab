//! Agent registry: dispatches each call to the backend named by the
//! resolved provider.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::claude_code::{ClaudeCodeAgent, ClaudeCodeConfig};
use super::codex::{CodexAgent, CodexConfig};
use super::mock::MockAgent;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentCallOptions, AgentResponse, Config, ProviderKind};
use crate::domain::ports::AgentCaller;

#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<ProviderKind, Arc<dyn AgentCaller>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the CLI backends from config plus the mock.
    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .with_agent(
                ProviderKind::Claude,
                Arc::new(ClaudeCodeAgent::new(ClaudeCodeConfig {
                    binary_path: config.claude.binary_path.clone(),
                    ..Default::default()
                })),
            )
            .with_agent(
                ProviderKind::Codex,
                Arc::new(CodexAgent::new(CodexConfig {
                    binary_path: config.codex.binary_path.clone(),
                })),
            )
            .with_agent(ProviderKind::Mock, Arc::new(MockAgent::new()))
    }

    pub fn with_agent(mut self, provider: ProviderKind, agent: Arc<dyn AgentCaller>) -> Self {
        self.agents.insert(provider, agent);
        self
    }

    pub fn get(&self, provider: ProviderKind) -> Option<Arc<dyn AgentCaller>> {
        self.agents.get(&provider).cloned()
    }
}

#[async_trait]
impl AgentCaller for AgentRegistry {
    async fn call(
        &self,
        persona: &str,
        prompt: &str,
        options: AgentCallOptions,
    ) -> DomainResult<AgentResponse> {
        let agent = self
            .agents
            .get(&options.provider)
            .ok_or_else(|| DomainError::ProviderNotConfigured(options.provider.to_string()))?;
        agent.call(persona, prompt, options).await
    }
}
