//! Session id persistence, one entry per session key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::SessionKey;
use crate::domain::ports::SessionStore;

#[derive(Debug, Serialize, Deserialize)]
struct SessionEntry {
    key: String,
    session_id: String,
    updated_at: DateTime<Utc>,
}

/// One JSON file per session key under a task's session directory.
///
/// Keys map to distinct files, so movements under different personas or
/// providers never write the same file.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<cwd>/.takt/sessions/<task>/`
    pub fn for_task(cwd: &Path, task: &str) -> Self {
        Self::new(cwd.join(".takt").join("sessions").join(task))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }
}

fn store_error(path: &Path, e: impl std::fmt::Display) -> DomainError {
    DomainError::SessionStoreFailed(format!("{}: {e}", path.display()))
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, key: &SessionKey) -> DomainResult<Option<String>> {
        let path = self.path_for(key);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error(&path, e)),
        };
        let entry: SessionEntry = serde_json::from_str(&text).map_err(|e| store_error(&path, e))?;
        Ok(Some(entry.session_id))
    }

    async fn set(&self, key: &SessionKey, session_id: &str) -> DomainResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| store_error(&self.dir, e))?;

        let path = self.path_for(key);
        let entry = SessionEntry {
            key: key.to_string(),
            session_id: session_id.to_string(),
            updated_at: Utc::now(),
        };
        let text = serde_json::to_string_pretty(&entry)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await.map_err(|e| store_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| store_error(&path, e))?;
        debug!(key = %key, path = %path.display(), "session saved");
        Ok(())
    }
}

/// In-memory session ids, for direct runs and tests.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionKey, String>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> HashMap<SessionKey, String> {
        self.sessions.read().await.clone()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &SessionKey) -> DomainResult<Option<String>> {
        Ok(self.sessions.read().await.get(key).cloned())
    }

    async fn set(&self, key: &SessionKey, session_id: &str) -> DomainResult<()> {
        self.sessions
            .write()
            .await
            .insert(key.clone(), session_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ProviderKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_partitions_by_key() {
        let temp = TempDir::new().unwrap();
        let store = FileSessionStore::for_task(temp.path(), "add-login");
        let plain = SessionKey::new("coder", None);
        let codex = SessionKey::new("coder", Some(ProviderKind::Codex));

        assert_eq!(store.get(&plain).await.unwrap(), None);
        store.set(&plain, "s-1").await.unwrap();
        store.set(&codex, "s-2").await.unwrap();

        assert_eq!(store.get(&plain).await.unwrap().as_deref(), Some("s-1"));
        assert_eq!(store.get(&codex).await.unwrap().as_deref(), Some("s-2"));
        assert!(store.dir().join("coder__codex.json").exists());
        assert!(temp.path().join(".takt/sessions/add-login/coder.json").exists());
    }

    #[tokio::test]
    async fn test_file_store_overwrites() {
        let temp = TempDir::new().unwrap();
        let store = FileSessionStore::new(temp.path());
        let key = SessionKey::new("planner", None);
        store.set(&key, "old").await.unwrap();
        store.set(&key, "new").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySessionStore::new();
        let key = SessionKey::new("planner", None);
        store.set(&key, "abc").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("abc"));
        assert_eq!(store.snapshot().await.len(), 1);
    }
}
