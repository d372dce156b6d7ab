//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::models::{ProviderKind, TaskStatus};

#[derive(Parser)]
#[command(name = "takt")]
#[command(about = "takt - piece/movement agent orchestrator with a durable task queue", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Suppress streaming agent output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Project directory (defaults to the current directory)
    #[arg(short = 'C', long, global = true, env = "TAKT_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a task to the queue
    Add(AddArgs),

    /// List queued tasks
    List {
        /// Filter by status (pending, running, completed, failed)
        #[arg(short, long, value_parser = parse_status)]
        status: Option<TaskStatus>,
    },

    /// Run pending tasks until the queue is empty
    Run(RunArgs),

    /// Keep running tasks as they are added, until interrupted
    Watch(RunArgs),

    /// Requeue a failed task
    Retry {
        /// Task name
        name: String,

        /// Movement to resume from
        #[arg(long = "from")]
        from: Option<String>,

        /// Note for the next attempt, appended to any earlier note
        #[arg(short, long)]
        note: Option<String>,
    },

    /// Delete a task, or all tasks with a status
    Delete {
        /// Task name
        #[arg(required_unless_present = "status", conflicts_with = "status")]
        name: Option<String>,

        /// Delete every task with this status
        #[arg(short, long, value_parser = parse_status)]
        status: Option<TaskStatus>,
    },

    /// Requeue running tasks whose process is gone
    Recover,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Task text
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    pub text: Option<String>,

    /// Read the task from a YAML/JSON task file
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Piece to run
    #[arg(short, long)]
    pub piece: Option<String>,

    /// Isolate the task in a git worktree, optionally at PATH
    #[arg(short, long, num_args = 0..=1, default_missing_value = "true", value_name = "PATH")]
    pub worktree: Option<String>,

    /// Branch for the worktree
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Linked issue number
    #[arg(short, long)]
    pub issue: Option<u32>,

    /// Open a pull request when done
    #[arg(long)]
    pub auto_pr: bool,

    /// Movement to start from
    #[arg(long)]
    pub start_movement: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Tasks run at once (overrides config)
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Provider for every movement
    #[arg(long, value_parser = parse_provider)]
    pub provider: Option<ProviderKind>,

    /// Model for every movement
    #[arg(short, long)]
    pub model: Option<String>,

    /// Ask for input when an agent is blocked
    #[arg(short, long)]
    pub interactive: bool,

    /// Uncoloured task prefixes
    #[arg(long)]
    pub plain: bool,
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    TaskStatus::from_str(s).ok_or_else(|| {
        format!("invalid status '{s}' (expected pending, running, completed or failed)")
    })
}

fn parse_provider(s: &str) -> Result<ProviderKind, String> {
    ProviderKind::from_str(s)
        .ok_or_else(|| format!("invalid provider '{s}' (expected claude, codex or mock)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_add_with_worktree_flag() {
        let cli = Cli::try_parse_from(["takt", "add", "Fix login", "--worktree"]).unwrap();
        let Commands::Add(args) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.text.as_deref(), Some("Fix login"));
        assert_eq!(args.worktree.as_deref(), Some("true"));
    }

    #[test]
    fn test_parse_delete_requires_name_or_status() {
        assert!(Cli::try_parse_from(["takt", "delete"]).is_err());
        let cli = Cli::try_parse_from(["takt", "delete", "--status", "completed"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Delete {
                status: Some(TaskStatus::Completed),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "takt", "--quiet", "run", "-c", "4", "--provider", "codex", "-m", "gpt-5",
        ])
        .unwrap();
        assert!(cli.quiet);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.concurrency, Some(4));
        assert_eq!(args.provider, Some(ProviderKind::Codex));
        assert_eq!(args.model.as_deref(), Some("gpt-5"));
    }
}
