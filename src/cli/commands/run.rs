//! `run` and `watch`: drive queued tasks through their pieces.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::agents::AgentRegistry;
use crate::adapters::terminal::StdinUserInput;
use crate::cli::context::AppContext;
use crate::cli::display::{output, CommandOutput};
use crate::cli::exit_code::ExitCode;
use crate::cli::types::RunArgs;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::pieces::PieceLoader;
use crate::services::{CliOverrides, RunSummary, RunnerOptions, TaskRunner, WorktreeService};

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub completed: usize,
    pub failed: usize,
    pub interrupted: usize,
    pub recovered: usize,
}

impl RunOutput {
    fn new(summary: RunSummary, recovered: usize) -> Self {
        Self {
            completed: summary.completed,
            failed: summary.failed,
            interrupted: summary.interrupted,
            recovered,
        }
    }
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let mut line = format!(
            "Tasks: {} completed, {} failed, {} interrupted",
            console::style(self.completed).green(),
            console::style(self.failed).red(),
            console::style(self.interrupted).yellow(),
        );
        if self.recovered > 0 {
            line.push_str(&format!(" ({} recovered)", self.recovered));
        }
        line
    }
}

/// Runner options: config values with command-line flags on top.
pub fn runner_options(ctx: &AppContext, args: &RunArgs, quiet: bool) -> RunnerOptions {
    let mut concurrency = args.concurrency.unwrap_or(ctx.config.concurrency).clamp(1, 32);
    if args.interactive && concurrency > 1 {
        warn!(concurrency, "interactive mode runs one task at a time");
        concurrency = 1;
    }
    RunnerOptions {
        concurrency,
        poll_interval: Duration::from_millis(ctx.config.watch_poll_interval_ms),
        default_piece: ctx.config.default_piece.clone(),
        quiet,
        interactive: args.interactive,
        plain_output: args.plain,
        loop_threshold: ctx.config.loop_threshold,
        max_movements_override: ctx.config.max_movements_override,
    }
}

pub fn build_runner(ctx: &AppContext, args: &RunArgs, quiet: bool) -> Arc<TaskRunner> {
    let pieces = PieceLoader::for_project(
        ctx.project_dir.join(&ctx.config.pieces_dir),
        ConfigLoader::global_dir(),
    );
    let mut runner = TaskRunner::new(
        ctx.lifecycle.clone(),
        Arc::new(pieces),
        Arc::new(AgentRegistry::from_config(&ctx.config)),
        WorktreeService::new(&ctx.project_dir, &ctx.config.worktree_dir),
        ctx.project_dir.clone(),
    )
    .with_options(runner_options(ctx, args, quiet))
    .with_provider_settings(ctx.provider_settings.clone())
    .with_cli_overrides(CliOverrides {
        provider: args.provider,
        model: args.model.clone(),
    });
    if args.interactive {
        runner = runner.with_user_input(Arc::new(StdinUserInput::new()));
    }
    Arc::new(runner)
}

/// Run pending tasks (or keep watching) and map the summary to an exit code.
pub async fn handle_run(
    ctx: &AppContext,
    args: RunArgs,
    watch: bool,
    quiet: bool,
    json: bool,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let recovered = ctx
        .lifecycle
        .recover_interrupted_running_tasks()
        .await
        .context("Failed to recover interrupted tasks")?;
    if recovered > 0 {
        info!(recovered, "requeued interrupted tasks");
    }

    let runner = build_runner(ctx, &args, quiet);
    let summary = if watch {
        runner.watch(cancel.clone()).await
    } else {
        runner.run_pending(cancel.clone()).await
    }
    .context("Task runner stopped")?;

    output(&RunOutput::new(summary, recovered), json);

    Ok(if cancel.is_cancelled() && (!watch || summary.interrupted > 0) {
        ExitCode::Interrupted
    } else if summary.failed > 0 {
        ExitCode::PieceRunFailed
    } else {
        ExitCode::Success
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Config;

    fn context(dir: &std::path::Path, config: Config) -> AppContext {
        AppContext::with_config(dir.to_path_buf(), config).unwrap()
    }

    #[test]
    fn test_flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            dir.path(),
            Config {
                concurrency: 2,
                ..Default::default()
            },
        );

        let options = runner_options(&ctx, &RunArgs::default(), false);
        assert_eq!(options.concurrency, 2);

        let args = RunArgs {
            concurrency: Some(6),
            ..Default::default()
        };
        assert_eq!(runner_options(&ctx, &args, true).concurrency, 6);
        assert!(runner_options(&ctx, &args, true).quiet);
    }

    #[test]
    fn test_interactive_forces_single_task() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Config::default());
        let args = RunArgs {
            concurrency: Some(4),
            interactive: true,
            ..Default::default()
        };
        assert_eq!(runner_options(&ctx, &args, false).concurrency, 1);
    }
}
