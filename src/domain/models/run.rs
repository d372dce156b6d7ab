//! Run-level models: engine state, execution context and outcomes.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use super::agent::{AgentResponse, StreamSender};
use crate::domain::errors::EngineError;

/// Maximum number of user inputs retained per run.
pub const MAX_USER_INPUTS: usize = 100;
/// Maximum length of one user input, in characters.
pub const MAX_USER_INPUT_CHARS: usize = 10_000;

/// Terminal outcome of one piece run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Reached `COMPLETE`
    Completed,
    /// Reached `ABORT`
    Aborted,
    /// An engine error ended the run
    Failed,
    /// Cancelled from outside
    Interrupted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a rule was selected for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Aggregate,
    StructuredOutput,
    Phase1Tag,
    Phase3Tag,
    AiJudgeFallback,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggregate => "aggregate",
            Self::StructuredOutput => "structured_output",
            Self::Phase1Tag => "phase1_tag",
            Self::Phase3Tag => "phase3_tag",
            Self::AiJudgeFallback => "ai_judge_fallback",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A matched rule: its index in declaration order and the method used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMatch {
    pub index: usize,
    pub method: MatchMethod,
}

impl RuleMatch {
    pub fn new(index: usize, method: MatchMethod) -> Self {
        Self { index, method }
    }
}

/// Bounded list of user inputs collected during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInputs {
    entries: VecDeque<String>,
}

impl UserInputs {
    /// Record an input, truncating it and evicting the oldest entry when full.
    pub fn push(&mut self, input: impl Into<String>) {
        let input: String = input.into();
        let input = match input.char_indices().nth(MAX_USER_INPUT_CHARS) {
            Some((cut, _)) => input[..cut].to_string(),
            None => input,
        };
        if self.entries.len() == MAX_USER_INPUTS {
            self.entries.pop_front();
        }
        self.entries.push_back(input);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

/// Mutable state of one engine run. Owned by a single engine invocation.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub current_movement: String,
    pub global_iteration: u32,
    pub movement_iterations: HashMap<String, u32>,
    pub user_inputs: UserInputs,
    pub history: Vec<AgentResponse>,
}

impl RunState {
    pub fn new(initial_movement: impl Into<String>) -> Self {
        Self {
            current_movement: initial_movement.into(),
            ..Default::default()
        }
    }

    /// Count one more execution of `movement` and return its 1-based count.
    pub fn bump_movement(&mut self, movement: &str) -> u32 {
        let count = self.movement_iterations.entry(movement.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn last_response(&self) -> Option<&AgentResponse> {
        self.history.last()
    }

    /// Number of movement executions so far.
    pub fn executions(&self) -> u32 {
        u32::try_from(self.history.len()).unwrap_or(u32::MAX)
    }
}

/// Explicit per-run context passed to every component that needs it.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Working directory agents run in (a worktree for isolated tasks)
    pub cwd: PathBuf,
    /// Project root holding `.takt/`
    pub project_dir: PathBuf,
    /// Suppress streaming agent text
    pub quiet: bool,
    /// Allow interactive-only rules and user input on `blocked`
    pub interactive: bool,
    pub cancel: CancellationToken,
    pub stream: Option<StreamSender>,
}

impl ExecutionContext {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        let cwd = cwd.into();
        Self {
            project_dir: cwd.clone(),
            cwd,
            quiet: false,
            interactive: false,
            cancel: CancellationToken::new(),
            stream: None,
        }
    }

    pub fn with_project_dir(mut self, project_dir: impl Into<PathBuf>) -> Self {
        self.project_dir = project_dir.into();
        self
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_stream(mut self, stream: StreamSender) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Write a line of run output (movement headers, notices).
    pub fn notify(&self, line: impl Into<String>) {
        if let Some(tx) = &self.stream {
            let mut line: String = line.into();
            line.push('\n');
            let _ = tx.send(line);
        }
    }
}

/// Result of one piece run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub reason: Option<String>,
    pub last_movement: Option<String>,
    pub last_message: Option<String>,
    pub error: Option<EngineError>,
    pub iterations: u32,
}

impl RunOutcome {
    pub fn completed(last_movement: String, last_message: Option<String>, iterations: u32) -> Self {
        Self {
            status: RunStatus::Completed,
            reason: None,
            last_movement: Some(last_movement),
            last_message,
            error: None,
            iterations,
        }
    }

    pub fn aborted(
        last_movement: String,
        reason: String,
        last_message: Option<String>,
        iterations: u32,
    ) -> Self {
        Self {
            status: RunStatus::Aborted,
            reason: Some(reason),
            last_movement: Some(last_movement),
            last_message,
            error: None,
            iterations,
        }
    }

    pub fn failed(
        error: EngineError,
        last_movement: Option<String>,
        last_message: Option<String>,
        iterations: u32,
    ) -> Self {
        let status = if error == EngineError::Interrupted {
            RunStatus::Interrupted
        } else {
            RunStatus::Failed
        };
        Self {
            status,
            reason: Some(error.to_string()),
            last_movement,
            last_message,
            error: Some(error),
            iterations,
        }
    }

    pub fn success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}
