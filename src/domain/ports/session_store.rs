use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::SessionKey;

/// Persisted agent session ids, partitioned by session key.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &SessionKey) -> DomainResult<Option<String>>;

    async fn set(&self, key: &SessionKey, session_id: &str) -> DomainResult<()>;
}
