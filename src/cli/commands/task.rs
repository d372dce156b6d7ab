//! Task queue commands: add, list, retry, delete and recover.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::context::AppContext;
use crate::cli::display::{
    action_success, colorize_status, list_table, output, render_list, truncate, CommandOutput,
};
use crate::cli::types::AddArgs;
use crate::domain::models::{TaskFileInput, TaskRecord, TaskSpec, TaskStatus, WorktreeSetting};

#[derive(Debug, Serialize)]
pub struct TaskListOutput {
    pub tasks: Vec<TaskRecord>,
    pub total: usize,
}

impl CommandOutput for TaskListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["name", "status", "piece", "movement", "content"]);
        for task in &self.tasks {
            let movement = task
                .failure
                .as_ref()
                .and_then(|f| f.movement.as_deref())
                .or(task.start_movement.as_deref())
                .unwrap_or("-");
            table.add_row(vec![
                task.name.clone(),
                colorize_status(task.status).to_string(),
                task.piece.clone().unwrap_or_else(|| "-".to_string()),
                movement.to_string(),
                truncate(task.content.lines().next().unwrap_or_default(), 48),
            ]);
        }
        render_list("task", &table, self.total)
    }
}

#[derive(Debug, Serialize)]
pub struct TaskActionOutput {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskRecord>,
}

impl CommandOutput for TaskActionOutput {
    fn to_human(&self) -> String {
        action_success(&self.message)
    }
}

#[derive(Debug, Serialize)]
pub struct TaskDeleteOutput {
    pub deleted: Vec<String>,
}

impl CommandOutput for TaskDeleteOutput {
    fn to_human(&self) -> String {
        match self.deleted.as_slice() {
            [] => "No tasks deleted.".to_string(),
            [one] => action_success(&format!("Deleted task {one}")),
            many => action_success(&format!("Deleted {} tasks: {}", many.len(), many.join(", "))),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecoverOutput {
    pub recovered: usize,
}

impl CommandOutput for RecoverOutput {
    fn to_human(&self) -> String {
        if self.recovered == 0 {
            "No interrupted tasks to recover.".to_string()
        } else {
            action_success(&format!("Requeued {} interrupted task(s)", self.recovered))
        }
    }
}

/// Build a task spec from inline text or a task file, with flags on top.
pub async fn build_spec(args: &AddArgs) -> Result<TaskSpec> {
    let mut spec = match (&args.file, &args.text) {
        (Some(path), _) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read task file {}", path.display()))?;
            let input = TaskFileInput::parse(&text).context("Failed to parse task file")?;
            TaskSpec::try_from(input).context("Invalid task file")?
        }
        (None, Some(text)) => TaskSpec::new(text.clone()),
        (None, None) => anyhow::bail!("Either task text or --file is required"),
    };

    if let Some(piece) = &args.piece {
        spec.piece = Some(piece.clone());
    }
    if let Some(worktree) = &args.worktree {
        spec.worktree = Some(match worktree.as_str() {
            "true" => WorktreeSetting::Enabled(true),
            "false" => WorktreeSetting::Enabled(false),
            path => WorktreeSetting::Path(PathBuf::from(path)),
        });
    }
    if let Some(branch) = &args.branch {
        spec.branch = Some(branch.clone());
    }
    if let Some(issue) = args.issue {
        spec.issue = Some(issue);
    }
    if let Some(movement) = &args.start_movement {
        spec.start_movement = Some(movement.clone());
    }
    spec.auto_pr |= args.auto_pr;
    Ok(spec)
}

pub async fn handle_add(ctx: &AppContext, args: AddArgs, json: bool) -> Result<()> {
    let spec = build_spec(&args).await?;
    let task = ctx
        .lifecycle
        .add_task(spec)
        .await
        .context("Failed to add task")?;

    output(
        &TaskActionOutput {
            success: true,
            message: format!("Added task {}", task.name),
            task: Some(task),
        },
        json,
    );
    Ok(())
}

pub async fn handle_list(ctx: &AppContext, status: Option<TaskStatus>, json: bool) -> Result<()> {
    let tasks: Vec<TaskRecord> = ctx
        .lifecycle
        .list()
        .await
        .context("Failed to list tasks")?
        .into_iter()
        .filter(|t| status.is_none_or(|s| t.status == s))
        .collect();

    let total = tasks.len();
    output(&TaskListOutput { tasks, total }, json);
    Ok(())
}

pub async fn handle_retry(
    ctx: &AppContext,
    name: &str,
    from: Option<String>,
    note: Option<String>,
    json: bool,
) -> Result<()> {
    let task = ctx
        .lifecycle
        .requeue_failed_task(name, from, note)
        .await
        .with_context(|| format!("Failed to requeue task {name}"))?;

    let message = match &task.start_movement {
        Some(movement) => format!("Requeued task {} from movement {movement}", task.name),
        None => format!("Requeued task {}", task.name),
    };
    output(
        &TaskActionOutput {
            success: true,
            message,
            task: Some(task),
        },
        json,
    );
    Ok(())
}

pub async fn handle_delete(
    ctx: &AppContext,
    name: Option<&str>,
    status: Option<TaskStatus>,
    json: bool,
) -> Result<()> {
    let deleted = match (name, status) {
        (Some(name), _) => vec![ctx
            .lifecycle
            .delete_task(name)
            .await
            .with_context(|| format!("Failed to delete task {name}"))?],
        (None, Some(status)) => ctx
            .lifecycle
            .delete_tasks_with_status(status)
            .await
            .with_context(|| format!("Failed to delete {status} tasks"))?,
        (None, None) => anyhow::bail!("Either a task name or --status is required"),
    };

    output(
        &TaskDeleteOutput {
            deleted: deleted.into_iter().map(|t| t.name).collect(),
        },
        json,
    );
    Ok(())
}

pub async fn handle_recover(ctx: &AppContext, json: bool) -> Result<()> {
    let recovered = ctx
        .lifecycle
        .recover_interrupted_running_tasks()
        .await
        .context("Failed to recover interrupted tasks")?;
    output(&RecoverOutput { recovered }, json);
    Ok(())
}
