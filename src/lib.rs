//! takt: a piece/movement agent orchestrator with a durable task queue.
//!
//! A *piece* is a named state machine of *movements*; each movement calls an
//! agent and its rules pick the next movement from the response. Tasks are
//! queued in a YAML ledger shared between processes and run concurrently,
//! each through its own engine.
//!
//! Layout:
//! - [`domain`]: models, errors and the ports adapters implement
//! - [`services`]: the engine, resolvers and the task queue
//! - [`adapters`]: agent backends, task and session stores, process probe
//! - [`infrastructure`]: configuration, logging and piece loading
//! - [`cli`]: the command-line shell

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult, EngineError};
pub use services::{PieceEngine, TaskLifecycleService, TaskRunner};
