pub mod agent;
pub mod config;
pub mod piece;
pub mod provider;
pub mod run;
pub mod session;
pub mod task;

pub use agent::{AgentCallOptions, AgentResponse, AgentStatus, StreamSender};
pub use config::{AgentBinaryConfig, Config, LoggingConfig, ProviderLayer, ProviderSettings};
pub use piece::{
    AggregateMode, Movement, NextMovement, Piece, Rule, RuleCondition, ABORT, COMPLETE,
};
pub use provider::{PermissionMode, PersonaProviderEntry, ProviderKind, ProviderProfile};
pub use run::{
    ExecutionContext, MatchMethod, RuleMatch, RunOutcome, RunState, RunStatus, UserInputs,
    MAX_USER_INPUTS, MAX_USER_INPUT_CHARS,
};
pub use session::SessionKey;
pub use task::{
    slugify, TaskExecutionResult, TaskFailure, TaskFileInput, TaskRecord, TaskSpec, TaskStatus,
    WorktreeSetting,
};
