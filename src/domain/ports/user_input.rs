use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Source of operator input when an agent reports it is blocked.
#[async_trait]
pub trait UserInputProvider: Send + Sync {
    /// `Ok(None)` means the operator declined to answer.
    async fn request_input(&self, movement: &str, message: &str) -> DomainResult<Option<String>>;
}
