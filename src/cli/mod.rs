//! Command-line interface: a thin shell over the task queue and runner.

pub mod commands;
pub mod context;
pub mod display;
pub mod exit_code;
pub mod types;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

pub use context::AppContext;
pub use exit_code::ExitCode;
pub use types::{AddArgs, Cli, Commands, RunArgs};

use commands::{run, task};
use display::{action_failure, output, CommandOutput};

/// Dispatch a parsed command.
pub async fn execute(
    command: Commands,
    ctx: &AppContext,
    quiet: bool,
    json: bool,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    match command {
        Commands::Add(args) => task::handle_add(ctx, args, json).await?,
        Commands::List { status } => task::handle_list(ctx, status, json).await?,
        Commands::Run(args) => return run::handle_run(ctx, args, false, quiet, json, cancel).await,
        Commands::Watch(args) => return run::handle_run(ctx, args, true, quiet, json, cancel).await,
        Commands::Retry { name, from, note } => {
            task::handle_retry(ctx, &name, from, note, json).await?;
        }
        Commands::Delete { name, status } => {
            task::handle_delete(ctx, name.as_deref(), status, json).await?;
        }
        Commands::Recover => task::handle_recover(ctx, json).await?,
    }
    Ok(ExitCode::Success)
}

#[derive(serde::Serialize)]
struct ErrorOutput {
    success: bool,
    error: String,
    exit_code: i32,
}

impl CommandOutput for ErrorOutput {
    fn to_human(&self) -> String {
        action_failure(&self.error)
    }
}

/// Report an error and pick the exit code for it.
pub fn handle_error(err: &anyhow::Error, json: bool) -> ExitCode {
    let code = ExitCode::from_error(err);
    let report = ErrorOutput {
        success: false,
        error: format!("{err:#}"),
        exit_code: code.code(),
    };
    if json {
        output(&report, true);
    } else {
        eprintln!("{}", report.to_human());
    }
    code
}
