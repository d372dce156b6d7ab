use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Piece;

/// Lookup of piece definitions by name.
#[async_trait]
pub trait PieceSource: Send + Sync {
    async fn load(&self, name: &str) -> DomainResult<Piece>;
}
