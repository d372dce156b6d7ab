use crate::domain::errors::DomainResult;

/// Liveness check for the process that claimed a task.
pub trait ProcessProbe: Send + Sync {
    /// `Ok(false)` only when the process is known to be gone.
    fn is_alive(&self, pid: u32) -> DomainResult<bool>;
}
