//! Piece Engine
//!
//! Drives one task through a piece, one movement per iteration:
//! resolve provider, model, permission and session; build the instruction;
//! call the agent; match a rule (judging the status when no tag decides);
//! then transition, check for loops and enforce the iteration cap.
//!
//! Engine errors never escape as `Err`. They end the run and are reported
//! in the returned [`RunOutcome`].

use futures::future::try_join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{DomainResult, EngineError};
use crate::domain::models::{
    AgentCallOptions, AgentResponse, AgentStatus, ExecutionContext, Movement, NextMovement, Piece,
    ProviderSettings, RuleMatch, RunOutcome, RunState, SessionKey, TaskRecord,
};
use crate::domain::ports::{
    AgentCaller, InstructionBuilder, InstructionContext, SessionStore, UserInputProvider,
};
use crate::services::instruction_builder::TemplateInstructionBuilder;
use crate::services::loop_detector::LoopDetector;
use crate::services::permission_resolver::resolve_permission;
use crate::services::provider_resolver::{resolve_provider, CliOverrides};
use crate::services::status_judge::StatusJudge;
use crate::services::transition_resolver::{self, TransitionContext};

/// The task-level input of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineTask {
    pub name: String,
    pub content: String,
    /// Overrides the piece's initial movement
    pub start_movement: Option<String>,
    pub retry_note: Option<String>,
    pub issue: Option<u32>,
}

impl EngineTask {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_start_movement(mut self, movement: impl Into<String>) -> Self {
        self.start_movement = Some(movement.into());
        self
    }
}

impl From<&TaskRecord> for EngineTask {
    fn from(record: &TaskRecord) -> Self {
        Self {
            name: record.name.clone(),
            content: record.content.clone(),
            start_movement: record.start_movement.clone(),
            retry_note: record.retry_note.clone(),
            issue: record.issue,
        }
    }
}

/// One executed movement turn.
struct Turn {
    response: AgentResponse,
    /// Options of the agent call, for resuming its session; `None` for
    /// parallel parents
    call: Option<AgentCallOptions>,
    /// Matched condition of each parallel sub-movement
    sub_outcomes: Vec<Option<String>>,
}

/// Read-only inputs shared by every turn of a run.
#[derive(Clone, Copy)]
struct RunInput<'a> {
    piece: &'a Piece,
    task: &'a EngineTask,
    ctx: &'a ExecutionContext,
    max_movements: u32,
}

pub struct PieceEngine {
    agent: Arc<dyn AgentCaller>,
    sessions: Arc<dyn SessionStore>,
    instructions: Arc<dyn InstructionBuilder>,
    judge: StatusJudge,
    user_input: Option<Arc<dyn UserInputProvider>>,
    settings: ProviderSettings,
    cli: CliOverrides,
    loop_threshold: usize,
    max_movements_override: Option<u32>,
}

impl PieceEngine {
    pub fn new(agent: Arc<dyn AgentCaller>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            judge: StatusJudge::new(agent.clone()),
            agent,
            sessions,
            instructions: Arc::new(TemplateInstructionBuilder::new()),
            user_input: None,
            settings: ProviderSettings::default(),
            cli: CliOverrides::default(),
            loop_threshold: LoopDetector::DEFAULT_THRESHOLD,
            max_movements_override: None,
        }
    }

    pub fn with_instruction_builder(mut self, builder: Arc<dyn InstructionBuilder>) -> Self {
        self.instructions = builder;
        self
    }

    pub fn with_user_input(mut self, provider: Arc<dyn UserInputProvider>) -> Self {
        self.user_input = Some(provider);
        self
    }

    pub fn with_provider_settings(mut self, settings: ProviderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cli_overrides(mut self, cli: CliOverrides) -> Self {
        self.cli = cli;
        self
    }

    /// Used when the piece does not set its own threshold.
    pub fn with_loop_threshold(mut self, threshold: usize) -> Self {
        self.loop_threshold = threshold;
        self
    }

    pub fn with_max_movements_override(mut self, max: Option<u32>) -> Self {
        self.max_movements_override = max;
        self
    }

    /// Run `task` through `piece` until it completes, aborts or fails.
    #[instrument(skip_all, fields(piece = %piece.name, task = %task.name))]
    pub async fn run(&self, piece: &Piece, task: &EngineTask, ctx: &ExecutionContext) -> RunOutcome {
        let start = task
            .start_movement
            .as_deref()
            .or_else(|| piece.initial_movement())
            .unwrap_or_default();
        if !piece.has_movement(start) {
            return RunOutcome::failed(
                EngineError::UnknownMovement {
                    name: start.to_string(),
                },
                None,
                None,
                0,
            );
        }

        let input = RunInput {
            piece,
            task,
            ctx,
            max_movements: self.max_movements_override.unwrap_or(piece.max_movements),
        };
        let threshold = piece.loop_threshold.unwrap_or(self.loop_threshold);
        let mut detector = LoopDetector::new(threshold);
        let mut state = RunState::new(start);
        info!(start, max_movements = input.max_movements, threshold, "piece run started");

        loop {
            let name = state.current_movement.clone();
            if ctx.cancel.is_cancelled() {
                return failure(&state, EngineError::Interrupted);
            }
            let Some(movement) = piece.movement(&name) else {
                return failure(&state, EngineError::UnknownMovement { name });
            };

            let movement_iteration = state.bump_movement(&name);
            ctx.notify(format!(
                "=== {name} ({}/{}) ===",
                state.global_iteration + 1,
                input.max_movements
            ));

            let turn = match self.execute(input, movement, &state, movement_iteration).await {
                Ok(turn) => turn,
                Err(error) => return failure(&state, error),
            };
            state.history.push(turn.response.clone());

            if turn.response.status == AgentStatus::Blocked && ctx.interactive {
                if let Some(provider) = &self.user_input {
                    match provider.request_input(&name, &turn.response.content).await {
                        Ok(Some(answer)) => {
                            state.user_inputs.push(answer);
                            state.global_iteration += 1;
                            if state.global_iteration >= input.max_movements {
                                return failure(
                                    &state,
                                    EngineError::MaxMovementsReached {
                                        max: input.max_movements,
                                    },
                                );
                            }
                            continue;
                        }
                        Ok(None) => {
                            info!(movement = %name, "blocked and no user input given");
                            return RunOutcome::aborted(
                                name,
                                "blocked".to_string(),
                                Some(turn.response.content),
                                state.executions(),
                            );
                        }
                        Err(e) => {
                            return failure(
                                &state,
                                EngineError::MovementExecutionFailed {
                                    movement: name,
                                    message: e.to_string(),
                                },
                            );
                        }
                    }
                }
            }

            let (next, condition) = if movement.rules.is_empty() {
                (piece.implicit_successor(&name), None)
            } else {
                let matched = match self.match_rule(movement, &turn, ctx).await {
                    Ok(Some(matched)) => matched,
                    Ok(None) => {
                        return failure(
                            &state,
                            EngineError::MovementExecutionFailed {
                                movement: name,
                                message: "no rule matched the response".to_string(),
                            },
                        );
                    }
                    Err(error) => return failure(&state, error),
                };
                let Some(rule) = movement.rules.get(matched.index) else {
                    return failure(
                        &state,
                        EngineError::MovementExecutionFailed {
                            movement: name,
                            message: format!("matched rule {} does not exist", matched.index + 1),
                        },
                    );
                };
                info!(
                    movement = %name,
                    rule = matched.index + 1,
                    method = %matched.method,
                    condition = rule.condition.text(),
                    "rule matched"
                );
                let Some(next) = rule.next.clone() else {
                    return failure(
                        &state,
                        EngineError::MovementExecutionFailed {
                            movement: name,
                            message: format!("rule '{}' has no next movement", rule.condition.text()),
                        },
                    );
                };
                (next, Some(rule.condition.text().to_string()))
            };

            match next {
                NextMovement::Complete => {
                    info!(movement = %name, iterations = state.executions(), "piece run completed");
                    return RunOutcome::completed(
                        name,
                        Some(turn.response.content),
                        state.executions(),
                    );
                }
                NextMovement::Abort => {
                    let reason = match condition {
                        Some(condition) => format!("Movement '{name}' aborted: {condition}"),
                        None => format!("Movement '{name}' aborted"),
                    };
                    info!(movement = %name, %reason, "piece run aborted");
                    return RunOutcome::aborted(
                        name,
                        reason,
                        Some(turn.response.content),
                        state.executions(),
                    );
                }
                NextMovement::Movement(target) => {
                    if !piece.has_movement(&target) {
                        return failure(&state, EngineError::UnknownMovement { name: target });
                    }
                    if let Some(count) = detector.observe(&name, &turn.response) {
                        return failure(&state, EngineError::LoopDetected { movement: name, count });
                    }
                    state.global_iteration += 1;
                    if state.global_iteration >= input.max_movements {
                        return failure(
                            &state,
                            EngineError::MaxMovementsReached {
                                max: input.max_movements,
                            },
                        );
                    }
                    debug!(from = %name, to = %target, "transition");
                    state.current_movement = target;
                }
            }
        }
    }

    async fn execute(
        &self,
        input: RunInput<'_>,
        movement: &Movement,
        state: &RunState,
        movement_iteration: u32,
    ) -> Result<Turn, EngineError> {
        if !movement.is_parallel() {
            let (response, call) = self
                .call_agent(input, movement, state, movement_iteration)
                .await?;
            return Ok(Turn {
                response,
                call: Some(call),
                sub_outcomes: vec![],
            });
        }

        let subs = movement.parallel.iter().map(|sub| async move {
            let (response, call) = self.call_agent(input, sub, state, movement_iteration).await?;
            let turn = Turn {
                response,
                call: Some(call),
                sub_outcomes: vec![],
            };
            let outcome = self
                .match_rule(sub, &turn, input.ctx)
                .await?
                .and_then(|m| sub.rules.get(m.index))
                .map(|rule| rule.condition.text().to_string());
            debug!(sub_movement = %sub.name, outcome = ?outcome, "sub-movement finished");
            Ok::<_, EngineError>((sub.name.as_str(), turn.response, outcome))
        });
        let results = try_join_all(subs).await?;

        let content = results
            .iter()
            .map(|(name, response, _)| format!("## {name}\n{}", response.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let status = if results
            .iter()
            .any(|(_, response, _)| response.status == AgentStatus::Blocked)
        {
            AgentStatus::Blocked
        } else {
            AgentStatus::Done
        };

        Ok(Turn {
            response: AgentResponse::new(movement.name.clone(), status, content),
            call: None,
            sub_outcomes: results.into_iter().map(|(_, _, outcome)| outcome).collect(),
        })
    }

    /// Resolve everything for one agent call, make it and record the session.
    async fn call_agent(
        &self,
        input: RunInput<'_>,
        movement: &Movement,
        state: &RunState,
        movement_iteration: u32,
    ) -> Result<(AgentResponse, AgentCallOptions), EngineError> {
        let ctx = input.ctx;
        let resolved = resolve_provider(movement, &self.cli, &self.settings);
        let permission = resolve_permission(movement, resolved.provider, &self.settings);
        let key = SessionKey::new(&movement.persona, resolved.movement_provider);

        let session_id = match self.sessions.get(&key).await {
            Ok(id) => id,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to read session, starting a new one");
                None
            }
        };

        let prompt = self.instructions.build(&InstructionContext {
            piece: input.piece,
            movement,
            state,
            task: &input.task.content,
            retry_note: input.task.retry_note.as_deref(),
            issue: input.task.issue,
            max_movements: input.max_movements,
            movement_iteration,
            interactive: ctx.interactive,
        });

        let mut options = AgentCallOptions {
            cwd: ctx.cwd.clone(),
            session_id,
            model: resolved.model.clone(),
            provider: resolved.provider,
            allowed_tools: movement.allowed_tools.clone(),
            permission_mode: permission,
            output_schema: movement.output_schema.clone(),
            stream: if ctx.quiet { None } else { ctx.stream.clone() },
        };
        debug!(
            movement = %movement.name,
            persona = %movement.persona,
            provider = %resolved.provider,
            model = ?resolved.model,
            permission = %permission,
            session = %key,
            resume = options.session_id.is_some(),
            "calling agent"
        );

        let response = cancellable(
            ctx,
            &movement.name,
            self.agent.call(&movement.persona, &prompt, options.clone()),
        )
        .await?;

        if let Some(id) = &response.session_id {
            if let Err(e) = self.sessions.set(&key, id).await {
                warn!(key = %key, error = %e, "failed to persist session");
            }
            options.session_id = Some(id.clone());
        }
        Ok((response, options))
    }

    /// Match a turn against the movement's rules, judging when needed.
    async fn match_rule(
        &self,
        movement: &Movement,
        turn: &Turn,
        ctx: &ExecutionContext,
    ) -> Result<Option<RuleMatch>, EngineError> {
        if movement.rules.is_empty() {
            return Ok(None);
        }
        let tctx = TransitionContext::for_movement(movement, ctx.interactive);
        if let Some(matched) =
            transition_resolver::resolve(movement, &turn.response, &turn.sub_outcomes, tctx)
        {
            return Ok(Some(matched));
        }

        let Some(call) = &turn.call else {
            return Ok(None);
        };
        debug!(movement = %movement.name, "no tag in response, judging status");
        let judgment = cancellable(
            ctx,
            &movement.name,
            self.judge.judge(movement, call, ctx.interactive),
        )
        .await?;
        Ok(transition_resolver::resolve_judgment(movement, &judgment, tctx))
    }
}

/// Race `fut` against the run's cancellation token.
async fn cancellable<T>(
    ctx: &ExecutionContext,
    movement: &str,
    fut: impl Future<Output = DomainResult<T>>,
) -> Result<T, EngineError> {
    tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => Err(EngineError::Interrupted),
        result = fut => result.map_err(|e| EngineError::MovementExecutionFailed {
            movement: movement.to_string(),
            message: e.to_string(),
        }),
    }
}

fn failure(state: &RunState, error: EngineError) -> RunOutcome {
    warn!(movement = %state.current_movement, error = %error, "piece run failed");
    RunOutcome::failed(
        error,
        Some(state.current_movement.clone()),
        state.last_response().map(|r| r.content.clone()),
        state.executions(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::agents::{MockAgent, MockReply};
    use crate::adapters::storage::MemorySessionStore;
    use crate::domain::models::{RuleCondition, RunStatus};

    fn engine(agent: &MockAgent) -> PieceEngine {
        PieceEngine::new(Arc::new(agent.clone()), Arc::new(MemorySessionStore::new()))
    }

    #[tokio::test]
    async fn test_rule_less_movements_fall_through_to_complete() {
        let agent = MockAgent::new();
        let piece = Piece::new(
            "linear",
            vec![Movement::new("plan", "planner"), Movement::new("implement", "coder")],
        );

        let outcome = engine(&agent)
            .run(&piece, &EngineTask::new("t", "do it"), &ExecutionContext::new("/tmp"))
            .await;

        assert!(outcome.success());
        assert_eq!(outcome.last_movement.as_deref(), Some("implement"));
        assert_eq!(outcome.iterations, 2);
        assert_eq!(agent.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_start_movement() {
        let agent = MockAgent::new();
        let piece = Piece::new("p", vec![Movement::new("plan", "planner")]);
        let task = EngineTask::new("t", "x").with_start_movement("nowhere");

        let outcome = engine(&agent).run(&piece, &task, &ExecutionContext::new("/tmp")).await;
        assert_eq!(
            outcome.error,
            Some(EngineError::UnknownMovement {
                name: "nowhere".to_string()
            })
        );
        assert!(agent.calls().is_empty());
    }

    #[tokio::test]
    async fn test_agent_error_is_movement_failure() {
        let agent = MockAgent::new();
        agent.push("planner", MockReply::failure("boom"));
        let piece = Piece::new("p", vec![Movement::new("plan", "planner")]);

        let outcome = engine(&agent)
            .run(&piece, &EngineTask::new("t", "x"), &ExecutionContext::new("/tmp"))
            .await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(matches!(
            outcome.error,
            Some(EngineError::MovementExecutionFailed { ref movement, .. }) if movement == "plan"
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_interrupted() {
        let agent = MockAgent::new();
        let piece = Piece::new("p", vec![Movement::new("plan", "planner")]);
        let ctx = ExecutionContext::new("/tmp");
        ctx.cancel.cancel();

        let outcome = engine(&agent).run(&piece, &EngineTask::new("t", "x"), &ctx).await;
        assert_eq!(outcome.status, RunStatus::Interrupted);
        assert_eq!(outcome.error, Some(EngineError::Interrupted));
    }

    #[tokio::test]
    async fn test_abort_reason_names_condition() {
        let agent = MockAgent::new();
        agent.push_reply("planner", "Cannot proceed [PLAN:1]");
        let piece = Piece::new(
            "p",
            vec![Movement::new("plan", "planner")
                .with_rule(RuleCondition::tag("requirements unclear"), NextMovement::Abort)],
        );

        let outcome = engine(&agent)
            .run(&piece, &EngineTask::new("t", "x"), &ExecutionContext::new("/tmp"))
            .await;
        assert_eq!(outcome.status, RunStatus::Aborted);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("Movement 'plan' aborted: requirements unclear")
        );
    }
}
