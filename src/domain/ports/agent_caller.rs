//! Agent caller port - interface for agent backends.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentCallOptions, AgentResponse};

/// One agent invocation: a persona answering a prompt.
///
/// Called exactly once per movement turn; callers never assume retry or
/// idempotence.
#[async_trait]
pub trait AgentCaller: Send + Sync {
    async fn call(
        &self,
        persona: &str,
        prompt: &str,
        options: AgentCallOptions,
    ) -> DomainResult<AgentResponse>;
}
