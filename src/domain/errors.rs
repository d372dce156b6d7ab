//! Domain errors for the takt orchestrator.

use thiserror::Error;

/// Errors that terminate a single piece run.
///
/// These never escape `PieceEngine::run` as `Err`; they are folded into the
/// run outcome so the lifecycle service can persist them verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Unknown movement: {name}")]
    UnknownMovement { name: String },

    #[error("Loop detected: movement '{movement}' repeated {count} times without progress")]
    LoopDetected { movement: String, count: usize },

    #[error("Max movements reached: {max}")]
    MaxMovementsReached { max: u32 },

    #[error("Movement '{movement}' failed: {message}")]
    MovementExecutionFailed { movement: String, message: String },

    #[error("Run interrupted")]
    Interrupted,
}

/// Domain-level errors that can occur in the takt system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task already exists: {0}")]
    DuplicateTask(String),

    #[error("Invalid state transition for task '{name}' from {from} to {to}")]
    InvalidStateTransition { name: String, from: String, to: String },

    #[error("Failed to write task store {path}: {message}")]
    TaskStoreWriteFailed { path: String, message: String },

    #[error("Failed to read task store {path}: {message}")]
    TaskStoreReadFailed { path: String, message: String },

    #[error("Timed out waiting for task store lock {path}")]
    TaskStoreLockTimeout { path: String },

    #[error("Stale running task '{name}' (owner pid {pid:?} is gone)")]
    StaleRunningTask { name: String, pid: Option<u32> },

    #[error("Invalid task input: {0}")]
    InvalidTaskInput(String),

    #[error("Invalid piece: {0}")]
    InvalidPiece(String),

    #[error("Piece not found: {0}")]
    PieceNotFound(String),

    #[error("Agent call via {provider} failed: {message}")]
    AgentFailed { provider: String, message: String },

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Git operation failed: {0}")]
    GitOperationFailed(String),

    #[error("Failed to probe process {pid}: {message}")]
    ProcessProbeFailed { pid: u32, message: String },

    #[error("Session store error: {0}")]
    SessionStoreFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for DomainError {
    fn from(err: serde_yaml::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_messages() {
        let err = EngineError::LoopDetected {
            movement: "fix".to_string(),
            count: 3,
        };
        assert_eq!(
            err.to_string(),
            "Loop detected: movement 'fix' repeated 3 times without progress"
        );

        let err = EngineError::UnknownMovement {
            name: "nowhere".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown movement: nowhere");
    }

    #[test]
    fn test_engine_error_is_transparent_in_domain_error() {
        let err: DomainError = EngineError::MaxMovementsReached { max: 5 }.into();
        assert_eq!(err.to_string(), "Max movements reached: 5");
        assert!(matches!(
            err,
            DomainError::Engine(EngineError::MaxMovementsReached { max: 5 })
        ));
    }
}
