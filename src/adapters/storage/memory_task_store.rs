//! In-memory task ledger for tests and single-process use.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TaskRecord;
use crate::domain::ports::{LedgerMutation, TaskLedger, TaskStore};

/// Same semantics as the file store, without the file.
///
/// `fail_writes(true)` makes every update fail after the mutation ran, the
/// way a full disk would.
#[derive(Clone, Default)]
pub struct MemoryTaskStore {
    ledger: Arc<Mutex<TaskLedger>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn load(&self) -> DomainResult<TaskLedger> {
        Ok(self.ledger.lock().await.clone())
    }

    async fn update(&self, mutation: LedgerMutation) -> DomainResult<Vec<TaskRecord>> {
        let mut guard = self.ledger.lock().await;
        let mut draft = guard.clone();
        let records = mutation(&mut draft)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DomainError::TaskStoreWriteFailed {
                path: "memory".to_string(),
                message: "simulated write failure".to_string(),
            });
        }
        *guard = draft;
        Ok(records)
    }
}
