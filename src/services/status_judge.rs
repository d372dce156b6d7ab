//! Status judgment phase.
//!
//! When a response carries no usable tag, the same session is resumed
//! with every tool disabled and the agent is asked to pick one status.

use std::sync::Arc;
use tracing::{debug, instrument};

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentCallOptions, Movement, PermissionMode};
use crate::domain::ports::AgentCaller;

pub struct StatusJudge {
    agent: Arc<dyn AgentCaller>,
}

impl StatusJudge {
    pub fn new(agent: Arc<dyn AgentCaller>) -> Self {
        Self { agent }
    }

    /// Ask the agent to state its status for `movement`.
    ///
    /// `call` is the option set of the turn being judged; its session id is
    /// resumed. The returned text is matched by the transition resolver.
    #[instrument(skip(self, movement, call), fields(movement = %movement.name, session = ?call.session_id))]
    pub async fn judge(
        &self,
        movement: &Movement,
        call: &AgentCallOptions,
        interactive: bool,
    ) -> DomainResult<String> {
        let options = AgentCallOptions {
            permission_mode: PermissionMode::Readonly,
            allowed_tools: Some(vec![]),
            output_schema: None,
            stream: None,
            ..call.clone()
        };

        let prompt = judgment_prompt(movement, interactive);
        let response = self.agent.call(&movement.persona, &prompt, options).await?;
        debug!(chars = response.content.len(), "status judgment received");
        Ok(response.content)
    }
}

fn judgment_prompt(movement: &Movement, interactive: bool) -> String {
    let tag = movement.tag_name();
    let criteria: Vec<String> = movement
        .rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| !rule.condition.is_aggregate() && (interactive || !rule.interactive_only))
        .map(|(i, rule)| format!("| {} | {} | [{tag}:{}] |", i + 1, rule.condition.text(), i + 1))
        .collect();

    format!(
        "Review the work you just did and decide which status applies.\n\
         Do not use any tools. Answer with exactly one tag and nothing else.\n\n\
         | # | Status | Tag |\n|---|---|---|\n{}",
        criteria.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::agents::MockAgent;
    use crate::domain::models::{NextMovement, ProviderKind, RuleCondition};

    #[tokio::test]
    async fn test_judge_resumes_session_readonly_without_tools() {
        let agent = Arc::new(MockAgent::new());
        agent.push_reply("reviewer", "[REVIEW:2]");
        let judge = StatusJudge::new(agent.clone());

        let movement = Movement::new("review", "reviewer")
            .with_rule(RuleCondition::tag("approved"), NextMovement::Complete)
            .with_rule(RuleCondition::tag("needs_fix"), NextMovement::movement("fix"));
        let mut call = AgentCallOptions::new("/tmp", ProviderKind::Mock);
        call.session_id = Some("sess-1".to_string());
        call.permission_mode = PermissionMode::Full;

        let text = judge.judge(&movement, &call, false).await.unwrap();
        assert_eq!(text, "[REVIEW:2]");

        let calls = agent.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].session_id.as_deref(), Some("sess-1"));
        assert_eq!(calls[0].permission_mode, PermissionMode::Readonly);
        assert_eq!(calls[0].allowed_tools, Some(vec![]));
        assert!(calls[0].prompt.contains("| 2 | needs_fix | [REVIEW:2] |"));
    }
}
