//! Concurrent Task Runner
//!
//! Claims pending tasks up to the concurrency limit and drives each through
//! its own [`PieceEngine`] in a `JoinSet`. Every task streams into its own
//! [`TaskPrefixWriter`] over a channel, so output stays line-atomic.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::storage::FileSessionStore;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ExecutionContext, ProviderSettings, RunOutcome, RunStatus, StreamSender, TaskExecutionResult,
    TaskRecord,
};
use crate::domain::ports::{AgentCaller, PieceSource, UserInputProvider};
use crate::services::loop_detector::LoopDetector;
use crate::services::output_prefixer::{stdout_sink, SharedSink, TaskPrefixWriter};
use crate::services::piece_engine::{EngineTask, PieceEngine};
use crate::services::provider_resolver::CliOverrides;
use crate::services::task_lifecycle::TaskLifecycleService;
use crate::services::worktree_service::WorktreeService;

/// Runner settings.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Maximum tasks in flight
    pub concurrency: usize,
    /// Idle sleep of `watch`
    pub poll_interval: Duration,
    /// Piece used when a task names none
    pub default_piece: String,
    pub quiet: bool,
    pub interactive: bool,
    /// Uncoloured prefixes
    pub plain_output: bool,
    pub loop_threshold: usize,
    pub max_movements_override: Option<u32>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval: Duration::from_millis(2000),
            default_piece: "default".to_string(),
            quiet: false,
            interactive: false,
            plain_output: false,
            loop_threshold: LoopDetector::DEFAULT_THRESHOLD,
            max_movements_override: None,
        }
    }
}

/// Tasks finished by one `run_pending` or `watch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub interrupted: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.interrupted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Completed,
    Failed,
    Interrupted,
}

pub struct TaskRunner {
    lifecycle: Arc<TaskLifecycleService>,
    pieces: Arc<dyn PieceSource>,
    agent: Arc<dyn AgentCaller>,
    worktrees: WorktreeService,
    user_input: Option<Arc<dyn UserInputProvider>>,
    settings: ProviderSettings,
    cli: CliOverrides,
    project_dir: PathBuf,
    options: RunnerOptions,
    sink: SharedSink,
}

impl TaskRunner {
    pub fn new(
        lifecycle: Arc<TaskLifecycleService>,
        pieces: Arc<dyn PieceSource>,
        agent: Arc<dyn AgentCaller>,
        worktrees: WorktreeService,
        project_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lifecycle,
            pieces,
            agent,
            worktrees,
            user_input: None,
            settings: ProviderSettings::default(),
            cli: CliOverrides::default(),
            project_dir: project_dir.into(),
            options: RunnerOptions::default(),
            sink: stdout_sink(),
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
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

    pub fn with_user_input(mut self, provider: Arc<dyn UserInputProvider>) -> Self {
        self.user_input = Some(provider);
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Run until nothing is pending and nothing is in flight.
    pub async fn run_pending(self: &Arc<Self>, cancel: CancellationToken) -> DomainResult<RunSummary> {
        self.drive(cancel, false).await
    }

    /// Keep polling for new tasks until cancelled.
    pub async fn watch(self: &Arc<Self>, cancel: CancellationToken) -> DomainResult<RunSummary> {
        self.drive(cancel, true).await
    }

    #[instrument(skip(self, cancel), fields(concurrency = self.options.concurrency))]
    async fn drive(self: &Arc<Self>, cancel: CancellationToken, watch: bool) -> DomainResult<RunSummary> {
        let concurrency = self.options.concurrency.max(1);
        let mut summary = RunSummary::default();
        let mut in_flight: JoinSet<DomainResult<TaskOutcome>> = JoinSet::new();
        let mut names: HashMap<Id, String> = HashMap::new();
        let mut first_error: Option<DomainError> = None;
        let mut started = 0usize;

        loop {
            let claiming = !cancel.is_cancelled() && first_error.is_none();
            let free = concurrency.saturating_sub(in_flight.len());
            if claiming && free > 0 {
                match self.lifecycle.claim_next_tasks(free).await {
                    Ok(tasks) => {
                        for task in tasks {
                            let runner = Arc::clone(self);
                            let cancel = cancel.clone();
                            let index = started;
                            started += 1;
                            let name = task.name.clone();
                            let handle =
                                in_flight.spawn(async move { runner.run_task(task, index, cancel).await });
                            names.insert(handle.id(), name);
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "failed to claim tasks, draining");
                        first_error = Some(e);
                    }
                }
            }

            if in_flight.is_empty() {
                if !watch || cancel.is_cancelled() || first_error.is_some() {
                    break;
                }
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.options.poll_interval) => continue,
                }
            }

            let polling = watch && claiming && in_flight.len() < concurrency;
            let joined = if polling {
                tokio::select! {
                    joined = in_flight.join_next_with_id() => joined,
                    () = cancel.cancelled() => None,
                    () = tokio::time::sleep(self.options.poll_interval) => None,
                }
            } else {
                in_flight.join_next_with_id().await
            };

            match joined {
                None => {}
                Some(Ok((id, result))) => {
                    names.remove(&id);
                    match result {
                        Ok(TaskOutcome::Completed) => summary.completed += 1,
                        Ok(TaskOutcome::Failed) => summary.failed += 1,
                        Ok(TaskOutcome::Interrupted) => summary.interrupted += 1,
                        Err(e) => {
                            error!(error = %e, "failed to record task result");
                            first_error.get_or_insert(e);
                        }
                    }
                }
                Some(Err(join_error)) => {
                    let Some(name) = names.remove(&join_error.id()) else {
                        error!(error = %join_error, "unknown task worker stopped");
                        continue;
                    };
                    error!(task = %name, error = %join_error, "task worker panicked");
                    match self.lifecycle.fail_task(panic_result(name, &join_error)).await {
                        Ok(_) => summary.failed += 1,
                        Err(DomainError::InvalidStateTransition { name, from, .. }) => {
                            warn!(task = %name, status = %from, "panicked task was already recorded");
                        }
                        Err(e) => {
                            error!(error = %e, "failed to record panicked task");
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
        }

        info!(
            completed = summary.completed,
            failed = summary.failed,
            interrupted = summary.interrupted,
            "runner finished"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    #[instrument(skip(self, task, cancel), fields(task = %task.name, run_id = %Uuid::new_v4()))]
    async fn run_task(
        &self,
        task: TaskRecord,
        index: usize,
        cancel: CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let mut writer = if self.options.plain_output {
            TaskPrefixWriter::plain(&task.name, self.sink.clone())
        } else {
            TaskPrefixWriter::new(&task.name, index, self.sink.clone())
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let forward = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = writer.write_chunk(&chunk) {
                    warn!(error = %e, "failed to write task output");
                }
            }
            if let Err(e) = writer.flush() {
                warn!(error = %e, "failed to flush task output");
            }
        });

        let outcome = self.execute(&task, cancel, tx).await;
        if let Err(e) = forward.await {
            warn!(error = %e, "output forwarder stopped");
        }

        let name = task.name.clone();
        match outcome {
            Ok(outcome) if outcome.success() => {
                let response = outcome
                    .last_message
                    .clone()
                    .unwrap_or_else(|| "Piece completed".to_string());
                self.lifecycle
                    .complete_task(TaskExecutionResult {
                        name,
                        response,
                        error: None,
                        movement: outcome.last_movement,
                        last_message: outcome.last_message,
                    })
                    .await?;
                Ok(TaskOutcome::Completed)
            }
            Ok(outcome) if outcome.status == RunStatus::Interrupted => {
                self.lifecycle.mark_interrupted(&[name]).await?;
                Ok(TaskOutcome::Interrupted)
            }
            Ok(outcome) => {
                self.lifecycle.fail_task(failure_result(name, outcome)).await?;
                Ok(TaskOutcome::Failed)
            }
            Err(e) => {
                warn!(error = %e, "task could not start");
                self.lifecycle
                    .fail_task(TaskExecutionResult {
                        name,
                        response: e.to_string(),
                        error: Some(e.to_string()),
                        movement: None,
                        last_message: None,
                    })
                    .await?;
                Ok(TaskOutcome::Failed)
            }
        }
    }

    /// Resolve the piece, prepare the working copy and run the engine.
    async fn execute(
        &self,
        task: &TaskRecord,
        cancel: CancellationToken,
        stream: StreamSender,
    ) -> DomainResult<RunOutcome> {
        let piece_name = task.piece.as_deref().unwrap_or(&self.options.default_piece);
        let piece = self.pieces.load(piece_name).await?;

        let cwd = match self.worktrees.prepare(task).await? {
            Some(worktree) => worktree.path,
            None => self.project_dir.clone(),
        };

        let mut engine = PieceEngine::new(
            self.agent.clone(),
            Arc::new(FileSessionStore::for_task(&cwd, &task.name)),
        )
        .with_provider_settings(self.settings.clone())
        .with_cli_overrides(self.cli.clone())
        .with_loop_threshold(self.options.loop_threshold)
        .with_max_movements_override(self.options.max_movements_override);
        if let Some(provider) = &self.user_input {
            engine = engine.with_user_input(provider.clone());
        }

        let ctx = ExecutionContext::new(cwd)
            .with_project_dir(self.project_dir.clone())
            .with_quiet(self.options.quiet)
            .with_interactive(self.options.interactive)
            .with_cancel(cancel)
            .with_stream(stream);

        info!(piece = %piece.name, cwd = %ctx.cwd.display(), "running task");
        Ok(engine.run(&piece, &EngineTask::from(task), &ctx).await)
    }
}

fn failure_result(name: String, outcome: RunOutcome) -> TaskExecutionResult {
    let reason = outcome
        .reason
        .clone()
        .unwrap_or_else(|| outcome.status.to_string());
    TaskExecutionResult {
        name,
        response: reason.clone(),
        error: Some(reason),
        movement: outcome.last_movement,
        last_message: outcome.last_message,
    }
}

fn panic_result(name: String, join_error: &tokio::task::JoinError) -> TaskExecutionResult {
    let message = format!("task worker stopped unexpectedly: {join_error}");
    TaskExecutionResult {
        name,
        response: message.clone(),
        error: Some(message),
        movement: None,
        last_message: None,
    }
}
