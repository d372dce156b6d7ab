//! Common test utilities for integration tests
//!
//! Shared fixtures for building pieces, engines and task queues.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use takt::adapters::agents::MockAgent;
use takt::adapters::storage::{FileTaskStore, MemorySessionStore};
use takt::domain::models::{ExecutionContext, Piece};
use takt::services::{SharedSink, TaskLifecycleService};
use takt::PieceEngine;

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn piece(yaml: &str) -> Piece {
    Piece::from_yaml_str(yaml).expect("test piece should parse")
}

/// Engine over a mock agent with in-memory sessions.
pub fn engine(agent: &MockAgent) -> PieceEngine {
    PieceEngine::new(Arc::new(agent.clone()), Arc::new(MemorySessionStore::new()))
}

pub fn context(dir: &Path) -> ExecutionContext {
    ExecutionContext::new(dir).with_quiet(true)
}

/// Lifecycle service over a task file, claiming as `owner_pid`.
pub fn file_lifecycle(path: &Path, owner_pid: u32) -> TaskLifecycleService {
    TaskLifecycleService::new(Arc::new(FileTaskStore::new(path))).with_owner_pid(owner_pid)
}

/// Sink that collects everything written to it.
pub fn capture_sink() -> (SharedSink, Arc<Mutex<Vec<u8>>>) {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let sink: SharedSink = buf.clone();
    (sink, buf)
}

pub fn captured(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8(buf.lock().unwrap().clone()).unwrap()
}
