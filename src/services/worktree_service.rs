//! Worktree Service
//!
//! Gives a task its own git working copy so concurrent tasks never edit the
//! same files.
//!
//! # Naming Convention
//!
//! - Branch: `takt/<task name>` unless the task names one
//! - Path: `<worktree_dir>/<task name>` unless the task gives an explicit path

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{TaskRecord, WorktreeSetting};

/// A prepared worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub path: PathBuf,
    pub branch: String,
    /// An existing valid worktree was reused
    pub reused: bool,
}

pub struct WorktreeService {
    repo_dir: PathBuf,
    worktree_dir: PathBuf,
}

impl WorktreeService {
    /// `worktree_dir` is resolved against `repo_dir` when relative.
    pub fn new(repo_dir: impl Into<PathBuf>, worktree_dir: impl AsRef<Path>) -> Self {
        let repo_dir = repo_dir.into();
        let worktree_dir = repo_dir.join(worktree_dir);
        Self {
            repo_dir,
            worktree_dir,
        }
    }

    /// Branch and path a task's worktree will use.
    pub fn plan(&self, task: &TaskRecord) -> (String, PathBuf) {
        let branch = task
            .branch
            .clone()
            .unwrap_or_else(|| format!("takt/{}", task.name));
        let path = match &task.worktree {
            Some(WorktreeSetting::Path(path)) => self.repo_dir.join(path),
            _ => self.worktree_dir.join(&task.name),
        };
        (branch, path)
    }

    /// Create (or reuse) the worktree for `task`.
    ///
    /// Returns `None` when the task did not ask for isolation. An explicit
    /// path that already exists is reused when it is the top level of a git
    /// working copy and rejected otherwise; it is never removed.
    #[instrument(skip(self, task), fields(task = %task.name))]
    pub async fn prepare(&self, task: &TaskRecord) -> DomainResult<Option<Worktree>> {
        if !task.uses_worktree() {
            debug!("task runs in the project directory");
            return Ok(None);
        }

        let (branch, path) = self.plan(task);
        if path.exists() {
            if self.is_working_copy(&path).await? {
                info!(path = %path.display(), "valid worktree already exists, reusing");
                return Ok(Some(Worktree {
                    path,
                    branch,
                    reused: true,
                }));
            }
            if !self.is_managed(task, &path) {
                return Err(DomainError::GitOperationFailed(format!(
                    "{} exists but is not a git working copy",
                    path.display()
                )));
            }
            warn!(path = %path.display(), "removing leftover directory that is not a worktree");
            tokio::fs::remove_dir_all(&path).await.map_err(|e| {
                DomainError::GitOperationFailed(format!("failed to remove {}: {e}", path.display()))
            })?;
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DomainError::GitOperationFailed(format!(
                    "failed to create {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let path_arg = path.to_string_lossy().into_owned();
        let args: Vec<&str> = if self.branch_exists(&branch).await {
            info!(%branch, "branch already exists, checking it out");
            vec!["worktree", "add", &path_arg, &branch]
        } else {
            vec!["worktree", "add", "-b", &branch, &path_arg]
        };
        self.git(&args).await?;

        info!(%branch, path = %path.display(), "worktree created");
        Ok(Some(Worktree {
            path,
            branch,
            reused: false,
        }))
    }

    /// Default-placed directories under `worktree_dir` belong to this
    /// service. Explicit paths never do.
    fn is_managed(&self, task: &TaskRecord, path: &Path) -> bool {
        !matches!(task.worktree, Some(WorktreeSetting::Path(_)))
            && path.starts_with(&self.worktree_dir)
            && path != self.worktree_dir
    }

    /// `path` is the top level of a git work tree (a worktree or a clone),
    /// not merely a directory inside some enclosing repository.
    async fn is_working_copy(&self, path: &Path) -> DomainResult<bool> {
        let output = Command::new("git")
            .current_dir(path)
            .args(["rev-parse", "--show-toplevel"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| DomainError::GitOperationFailed(format!("failed to run git: {e}")))?;
        if !output.status.success() {
            return Ok(false);
        }

        let toplevel = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        let (Ok(toplevel), Ok(path)) = (
            tokio::fs::canonicalize(&toplevel).await,
            tokio::fs::canonicalize(path).await,
        ) else {
            return Ok(false);
        };
        Ok(toplevel == path)
    }

    async fn branch_exists(&self, branch: &str) -> bool {
        Command::new("git")
            .current_dir(&self.repo_dir)
            .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|s| s.success())
    }

    async fn git(&self, args: &[&str]) -> DomainResult<()> {
        let output = Command::new("git")
            .current_dir(&self.repo_dir)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DomainError::GitOperationFailed(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(args = ?args, stderr = %stderr.trim(), "git command failed");
            return Err(DomainError::GitOperationFailed(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(())
    }
}
