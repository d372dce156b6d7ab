//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces that adapters implement:
//! - AgentCaller: agent backends (Claude CLI, Codex CLI, mock)
//! - TaskStore: the durable task ledger
//! - SessionStore: agent session ids by session key
//! - ProcessProbe: owner-process liveness
//! - InstructionBuilder, UserInputProvider, PieceSource: engine collaborators

pub mod agent_caller;
pub mod instruction_builder;
pub mod piece_source;
pub mod process_probe;
pub mod session_store;
pub mod task_store;
pub mod user_input;

pub use agent_caller::AgentCaller;
pub use instruction_builder::{InstructionBuilder, InstructionContext};
pub use piece_source::PieceSource;
pub use process_probe::ProcessProbe;
pub use session_store::SessionStore;
pub use task_store::{LedgerMutation, TaskLedger, TaskStore};
pub use user_input::UserInputProvider;
