//! Spawning agent CLIs that print one JSON event per line.

use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ProviderKind;

fn agent_failed(provider: ProviderKind, message: impl Into<String>) -> DomainError {
    DomainError::AgentFailed {
        provider: provider.to_string(),
        message: message.into(),
    }
}

/// Run `cmd` to completion, handing each stdout line to `on_line`.
///
/// The child is killed if the returned future is dropped. A non-zero exit
/// becomes `AgentFailed` carrying the stderr text.
pub(super) async fn run_json_lines<F>(
    mut cmd: Command,
    provider: ProviderKind,
    mut on_line: F,
) -> DomainResult<()>
where
    F: FnMut(&str) + Send,
{
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| agent_failed(provider, format!("failed to spawn {provider}: {e}")))?;
    debug!(%provider, pid = ?child.id(), "agent process started");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| agent_failed(provider, "failed to capture stdout"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| agent_failed(provider, "failed to capture stderr"))?;

    let stderr_task = tokio::spawn(async move {
        let mut text = String::new();
        let _ = stderr.read_to_string(&mut text).await;
        text
    });

    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| agent_failed(provider, format!("failed to read output: {e}")))?
    {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            on_line(trimmed);
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| agent_failed(provider, format!("failed to wait for process: {e}")))?;
    let error_text = stderr_task.await.unwrap_or_default();

    if status.success() {
        Ok(())
    } else if error_text.trim().is_empty() {
        Err(agent_failed(provider, format!("process exited with code: {:?}", status.code())))
    } else {
        Err(agent_failed(provider, error_text.trim().to_string()))
    }
}
