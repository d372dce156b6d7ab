//! Task store port - durable ledger of task records.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;
use crate::domain::models::TaskRecord;

/// The whole persisted task list, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLedger {
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
}

impl TaskLedger {
    pub fn find(&self, name: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut TaskRecord> {
        self.tasks.iter_mut().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }
}

/// A read-modify-write step applied to a private copy of the ledger.
///
/// Returns the records the caller wants back. An `Err` discards the copy.
pub type LedgerMutation =
    Box<dyn FnOnce(&mut TaskLedger) -> DomainResult<Vec<TaskRecord>> + Send>;

/// Serialized access to the task ledger.
///
/// `update` is the only way to change the ledger. Implementations apply the
/// mutation under exclusive access and persist the result before returning;
/// if persisting fails the stored ledger is unchanged and the error is
/// returned.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn load(&self) -> DomainResult<TaskLedger>;

    async fn update(&self, mutation: LedgerMutation) -> DomainResult<Vec<TaskRecord>>;
}
