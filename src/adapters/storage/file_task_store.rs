//! YAML-file task ledger shared between processes.
//!
//! Every update runs under an in-process mutex and an exclusive advisory
//! lock on `<tasks file>.lock`, re-reads the file, applies the mutation to
//! that fresh copy and replaces the file with an atomic rename. A failed
//! write leaves the previous file in place.

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use fs4::FileExt;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TaskRecord;
use crate::domain::ports::{LedgerMutation, TaskLedger, TaskStore};

const LOCK_RETRY_INITIAL: Duration = Duration::from_millis(10);
const LOCK_RETRY_MAX: Duration = Duration::from_millis(500);

pub struct FileTaskStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    local: Mutex<()>,
}

impl FileTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.clone().into_os_string();
        lock_name.push(".lock");
        Self {
            lock_path: PathBuf::from(lock_name),
            path,
            lock_timeout: Duration::from_secs(30),
            local: Mutex::new(()),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn path_str(&self) -> String {
        self.path.display().to_string()
    }

    fn read_failed(&self, e: impl std::fmt::Display) -> DomainError {
        DomainError::TaskStoreReadFailed {
            path: self.path_str(),
            message: e.to_string(),
        }
    }

    fn write_failed(&self, e: impl std::fmt::Display) -> DomainError {
        DomainError::TaskStoreWriteFailed {
            path: self.path_str(),
            message: e.to_string(),
        }
    }

    /// Take the cross-process lock, retrying while another holder has it.
    async fn acquire_lock(&self) -> DomainResult<File> {
        if let Some(parent) = self.lock_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.write_failed(e))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .await
            .map_err(|e| self.write_failed(e))?
            .into_std()
            .await;

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(LOCK_RETRY_INITIAL)
            .with_max_interval(LOCK_RETRY_MAX)
            .with_max_elapsed_time(Some(self.lock_timeout))
            .build();

        let handle = &file;
        let lock_path = &self.lock_path;
        let locked = backoff::future::retry(policy, || async move {
            match handle.try_lock_exclusive() {
                Ok(()) => Ok(()),
                Err(e) if is_contended(&e) => {
                    debug!(lock = %lock_path.display(), "task store lock busy");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await;

        match locked {
            Ok(()) => Ok(file),
            Err(e) if is_contended(&e) => {
                warn!(lock = %self.lock_path.display(), "timed out waiting for task store lock");
                Err(DomainError::TaskStoreLockTimeout {
                    path: self.lock_path.display().to_string(),
                })
            }
            Err(e) => Err(self.write_failed(e)),
        }
    }

    async fn read_ledger(&self) -> DomainResult<TaskLedger> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(TaskLedger::default()),
            Err(e) => return Err(self.read_failed(e)),
        };
        if text.trim().is_empty() {
            return Ok(TaskLedger::default());
        }
        serde_yaml::from_str(&text).map_err(|e| self.read_failed(e))
    }

    async fn write_ledger(&self, ledger: &TaskLedger) -> DomainResult<()> {
        let text = serde_yaml::to_string(ledger).map_err(|e| self.write_failed(e))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.write_failed(e))?;
        }

        let mut tmp_name = self.path.clone().into_os_string();
        tmp_name.push(format!(".tmp.{}", std::process::id()));
        let tmp = PathBuf::from(tmp_name);

        if let Err(e) = tokio::fs::write(&tmp, text).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.write_failed(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.write_failed(e));
        }
        Ok(())
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs4::lock_contended_error().raw_os_error()
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn load(&self) -> DomainResult<TaskLedger> {
        self.read_ledger().await
    }

    #[instrument(skip(self, mutation), fields(path = %self.path.display()))]
    async fn update(&self, mutation: LedgerMutation) -> DomainResult<Vec<TaskRecord>> {
        let _local = self.local.lock().await;
        let _lock = self.acquire_lock().await?;

        let mut ledger = self.read_ledger().await?;
        let records = mutation(&mut ledger)?;
        self.write_ledger(&ledger).await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{TaskSpec, TaskStatus};
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn add(name: &'static str) -> LedgerMutation {
        Box::new(move |ledger: &mut TaskLedger| {
            let record = TaskRecord::from_spec(name, TaskSpec::new(name));
            ledger.tasks.push(record.clone());
            Ok(vec![record])
        })
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_ledger() {
        let temp = TempDir::new().unwrap();
        let store = FileTaskStore::new(temp.path().join("tasks.yaml"));
        assert!(store.load().await.unwrap().tasks.is_empty());
    }

    #[tokio::test]
    async fn test_update_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".takt/tasks.yaml");
        let store = FileTaskStore::new(&path);

        store.update(add("first")).await.unwrap();
        store.update(add("second")).await.unwrap();

        let reopened = FileTaskStore::new(&path);
        let ledger = reopened.load().await.unwrap();
        let names: Vec<_> = ledger.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(ledger.tasks[0].status, TaskStatus::Pending);
        assert!(temp.path().join(".takt/tasks.yaml.lock").exists());
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_file_unchanged() {
        let temp = TempDir::new().unwrap();
        let store = FileTaskStore::new(temp.path().join("tasks.yaml"));
        store.update(add("kept")).await.unwrap();

        let result = store
            .update(Box::new(|ledger: &mut TaskLedger| {
                ledger.tasks.clear();
                Err(DomainError::TaskNotFound("nope".to_string()))
            }))
            .await;
        assert!(result.is_err());
        assert_eq!(store.load().await.unwrap().tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_lock_timeout_when_held_elsewhere() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.yaml");
        let store = FileTaskStore::new(&path).with_lock_timeout(Duration::from_millis(100));

        let holder = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(temp.path().join("tasks.yaml.lock"))
            .unwrap();
        holder.try_lock_exclusive().unwrap();

        let err = store.update(add("blocked")).await.unwrap_err();
        assert!(matches!(err, DomainError::TaskStoreLockTimeout { .. }));

        drop(holder);
        store.update(add("after")).await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_released_after_update() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/tasks.yaml");
        let store = FileTaskStore::new(&path);
        store.update(add("first")).await.unwrap();

        let other = OpenOptions::new()
            .write(true)
            .open(temp.path().join("nested/tasks.yaml.lock"))
            .unwrap();
        other.try_lock_exclusive().unwrap();
        other.unlock().unwrap();
        drop(other);

        store.update(add("second")).await.unwrap();
        assert_eq!(store.load().await.unwrap().tasks.len(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_propagates() {
        let temp = TempDir::new().unwrap();
        // the ledger path is a directory, so the final rename fails
        let path = temp.path().join("tasks.yaml");
        std::fs::create_dir_all(path.join("occupied")).unwrap();
        let store = FileTaskStore::new(&path);

        let err = store.update(add("lost")).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::TaskStoreReadFailed { .. } | DomainError::TaskStoreWriteFailed { .. }
        ));
    }
}
