//! Operator input read from the terminal.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::UserInputProvider;

/// Prompts on stderr and reads one line from stdin.
///
/// An empty line or end of input declines. Concurrent prompts are
/// serialized so answers cannot interleave.
#[derive(Debug, Default)]
pub struct StdinUserInput {
    lock: Mutex<()>,
}

impl StdinUserInput {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserInputProvider for StdinUserInput {
    async fn request_input(&self, movement: &str, message: &str) -> DomainResult<Option<String>> {
        let _turn = self.lock.lock().await;

        let mut stderr = tokio::io::stderr();
        let prompt = format!("\n[{movement}] agent is blocked:\n{message}\n> ");
        stderr
            .write_all(prompt.as_bytes())
            .await
            .map_err(|e| DomainError::InvalidTaskInput(format!("failed to prompt: {e}")))?;
        stderr.flush().await.ok();

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| DomainError::InvalidTaskInput(format!("failed to read input: {e}")))?;

        let answer = line.trim();
        Ok((!answer.is_empty()).then(|| answer.to_string()))
    }
}
