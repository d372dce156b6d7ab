//! Task Lifecycle Service
//!
//! Every state change of a task record goes through here, each as one
//! serialized read-modify-write of the task store:
//!
//! ```text
//! pending --claim--> running --complete--> completed
//!                       |  \--fail------> failed --requeue--> pending
//!                       \--recover (owner gone)-------------> pending
//! ```

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::adapters::process::NixProcessProbe;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    TaskExecutionResult, TaskFailure, TaskRecord, TaskSpec, TaskStatus,
};
use crate::domain::ports::{ProcessProbe, TaskLedger, TaskStore};

pub struct TaskLifecycleService {
    store: Arc<dyn TaskStore>,
    probe: Arc<dyn ProcessProbe>,
    owner_pid: u32,
}

impl TaskLifecycleService {
    /// Claims are stamped with the current process id.
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            probe: Arc::new(NixProcessProbe),
            owner_pid: std::process::id(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_owner_pid(mut self, pid: u32) -> Self {
        self.owner_pid = pid;
        self
    }

    pub fn owner_pid(&self) -> u32 {
        self.owner_pid
    }

    /// All records in insertion order.
    pub async fn list(&self) -> DomainResult<Vec<TaskRecord>> {
        Ok(self.store.load().await?.tasks)
    }

    pub async fn get(&self, name: &str) -> DomainResult<TaskRecord> {
        self.store
            .load()
            .await?
            .find(name)
            .cloned()
            .ok_or_else(|| DomainError::TaskNotFound(name.to_string()))
    }

    /// Validate `spec` and append it as a pending record with a unique name.
    #[instrument(skip_all)]
    pub async fn add_task(&self, spec: TaskSpec) -> DomainResult<TaskRecord> {
        spec.validate()?;
        let base = spec.slug();

        let mut records = self
            .store
            .update(Box::new(move |ledger: &mut TaskLedger| -> DomainResult<Vec<TaskRecord>> {
                let name = unique_name(ledger, &base);
                let record = TaskRecord::from_spec(name, spec);
                ledger.tasks.push(record.clone());
                Ok(vec![record])
            }))
            .await?;

        let record = records.pop().ok_or_else(|| DomainError::TaskStoreWriteFailed {
            path: "task store".to_string(),
            message: "add returned no record".to_string(),
        })?;
        info!(task = %record.name, "task added");
        Ok(record)
    }

    /// Atomically move up to `n` pending records to `running`.
    #[instrument(skip(self), fields(owner = self.owner_pid))]
    pub async fn claim_next_tasks(&self, n: usize) -> DomainResult<Vec<TaskRecord>> {
        if n == 0 {
            return Ok(vec![]);
        }
        let owner = self.owner_pid;
        let claimed = self
            .store
            .update(Box::new(move |ledger: &mut TaskLedger| -> DomainResult<Vec<TaskRecord>> {
                let now = Utc::now();
                let claimed: Vec<TaskRecord> = ledger
                    .tasks
                    .iter_mut()
                    .filter(|t| t.status == TaskStatus::Pending)
                    .take(n)
                    .map(|task| {
                        task.status = TaskStatus::Running;
                        task.owner_pid = Some(owner);
                        task.started_at = Some(now);
                        task.clone()
                    })
                    .collect();
                Ok(claimed)
            }))
            .await?;

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed tasks");
        }
        Ok(claimed)
    }

    /// Mark a running record completed and persist its response.
    #[instrument(skip_all, fields(task = %result.name))]
    pub async fn complete_task(&self, result: TaskExecutionResult) -> DomainResult<TaskRecord> {
        let record = self
            .finish(result.name.clone(), TaskStatus::Completed, move |task| {
                task.response = Some(result.response);
                task.failure = None;
            })
            .await?;
        info!("task completed");
        Ok(record)
    }

    /// Mark a running record failed, recording where it stopped.
    #[instrument(skip_all, fields(task = %result.name))]
    pub async fn fail_task(&self, result: TaskExecutionResult) -> DomainResult<TaskRecord> {
        let record = self
            .finish(result.name.clone(), TaskStatus::Failed, move |task| {
                task.failure = Some(TaskFailure {
                    movement: result.movement,
                    error: result.error.unwrap_or_else(|| result.response.clone()),
                    last_message: result.last_message,
                    timestamp: Utc::now(),
                });
                task.response = Some(result.response);
            })
            .await?;
        warn!(
            movement = ?record.failure.as_ref().and_then(|f| f.movement.as_deref()),
            "task failed"
        );
        Ok(record)
    }

    async fn finish(
        &self,
        name: String,
        to: TaskStatus,
        apply: impl FnOnce(&mut TaskRecord) + Send + 'static,
    ) -> DomainResult<TaskRecord> {
        let mut records = self
            .store
            .update(Box::new(move |ledger: &mut TaskLedger| -> DomainResult<Vec<TaskRecord>> {
                let task = running_record(ledger, &name, to)?;
                task.status = to;
                task.owner_pid = None;
                task.completed_at = Some(Utc::now());
                apply(task);
                Ok(vec![task.clone()])
            }))
            .await?;
        records.pop().ok_or_else(|| DomainError::TaskStoreWriteFailed {
            path: "task store".to_string(),
            message: "update returned no record".to_string(),
        })
    }

    /// Move a failed record back to pending.
    ///
    /// A new retry note is appended to an existing one after a blank line.
    #[instrument(skip(self, retry_note))]
    pub async fn requeue_failed_task(
        &self,
        name: &str,
        start_movement: Option<String>,
        retry_note: Option<String>,
    ) -> DomainResult<TaskRecord> {
        let name = name.to_string();
        let mut records = self
            .store
            .update(Box::new(move |ledger: &mut TaskLedger| -> DomainResult<Vec<TaskRecord>> {
                let task = ledger
                    .find_mut(&name)
                    .ok_or_else(|| DomainError::TaskNotFound(name.clone()))?;
                if task.status != TaskStatus::Failed {
                    return Err(DomainError::InvalidStateTransition {
                        name: name.clone(),
                        from: task.status.to_string(),
                        to: TaskStatus::Pending.to_string(),
                    });
                }

                task.status = TaskStatus::Pending;
                task.failure = None;
                task.owner_pid = None;
                task.started_at = None;
                task.completed_at = None;
                if let Some(movement) = start_movement {
                    task.start_movement = Some(movement);
                }
                if let Some(note) = retry_note.filter(|n| !n.trim().is_empty()) {
                    task.retry_note = Some(match task.retry_note.take() {
                        Some(existing) if !existing.is_empty() => format!("{existing}\n\n{note}"),
                        _ => note,
                    });
                }
                Ok(vec![task.clone()])
            }))
            .await?;

        let record = records.pop().ok_or_else(|| DomainError::TaskNotFound(String::new()))?;
        info!(task = %record.name, start_movement = ?record.start_movement, "task requeued");
        Ok(record)
    }

    /// Requeue running records whose owner is gone. Returns how many.
    ///
    /// A record without an owner was marked interrupted. Liveness is probed
    /// before taking the store lock; a record whose owner changed in between
    /// is left alone.
    #[instrument(skip(self))]
    pub async fn recover_interrupted_running_tasks(&self) -> DomainResult<usize> {
        let ledger = self.store.load().await?;
        let mut stale: HashMap<String, Option<u32>> = HashMap::new();
        for task in ledger.tasks.iter().filter(|t| t.status == TaskStatus::Running) {
            let dead = match task.owner_pid {
                None => true,
                Some(pid) => !self.probe.is_alive(pid)?,
            };
            if dead {
                stale.insert(task.name.clone(), task.owner_pid);
            }
        }
        if stale.is_empty() {
            return Ok(0);
        }

        let recovered = self
            .store
            .update(Box::new(move |ledger: &mut TaskLedger| -> DomainResult<Vec<TaskRecord>> {
                let mut recovered = vec![];
                for task in &mut ledger.tasks {
                    let Some(pid) = stale.get(&task.name) else {
                        continue;
                    };
                    if task.status != TaskStatus::Running || task.owner_pid != *pid {
                        continue;
                    }
                    task.status = TaskStatus::Pending;
                    task.owner_pid = None;
                    task.started_at = None;
                    recovered.push(task.clone());
                }
                Ok(recovered)
            }))
            .await?;

        for task in &recovered {
            let stale = DomainError::StaleRunningTask {
                name: task.name.clone(),
                pid: ledger.find(&task.name).and_then(|t| t.owner_pid),
            };
            info!(task = %task.name, "{stale}, requeued");
        }
        Ok(recovered.len())
    }

    /// Clear the owner of running records so recovery requeues them.
    #[instrument(skip(self))]
    pub async fn mark_interrupted(&self, names: &[String]) -> DomainResult<usize> {
        if names.is_empty() {
            return Ok(0);
        }
        let names = names.to_vec();
        let marked = self
            .store
            .update(Box::new(move |ledger: &mut TaskLedger| -> DomainResult<Vec<TaskRecord>> {
                Ok(ledger
                    .tasks
                    .iter_mut()
                    .filter(|t| t.status == TaskStatus::Running && names.contains(&t.name))
                    .map(|task| {
                        task.owner_pid = None;
                        task.clone()
                    })
                    .collect())
            }))
            .await?;
        info!(count = marked.len(), "marked running tasks as interrupted");
        Ok(marked.len())
    }

    /// Remove a record that is not running.
    #[instrument(skip(self))]
    pub async fn delete_task(&self, name: &str) -> DomainResult<TaskRecord> {
        let name = name.to_string();
        let mut removed = self
            .store
            .update(Box::new(move |ledger: &mut TaskLedger| -> DomainResult<Vec<TaskRecord>> {
                let index = ledger
                    .tasks
                    .iter()
                    .position(|t| t.name == name)
                    .ok_or_else(|| DomainError::TaskNotFound(name.clone()))?;
                let status = ledger.tasks[index].status;
                if status == TaskStatus::Running {
                    return Err(DomainError::InvalidStateTransition {
                        name: name.clone(),
                        from: status.to_string(),
                        to: "deleted".to_string(),
                    });
                }
                Ok(vec![ledger.tasks.remove(index)])
            }))
            .await?;

        let record = removed.pop().ok_or_else(|| DomainError::TaskNotFound(String::new()))?;
        info!(task = %record.name, "task deleted");
        Ok(record)
    }

    /// Remove every record with `status`. Running records cannot be deleted.
    #[instrument(skip(self))]
    pub async fn delete_tasks_with_status(&self, status: TaskStatus) -> DomainResult<Vec<TaskRecord>> {
        if status == TaskStatus::Running {
            return Err(DomainError::InvalidStateTransition {
                name: "*".to_string(),
                from: status.to_string(),
                to: "deleted".to_string(),
            });
        }
        let removed = self
            .store
            .update(Box::new(move |ledger: &mut TaskLedger| -> DomainResult<Vec<TaskRecord>> {
                let (removed, kept): (Vec<TaskRecord>, Vec<TaskRecord>) = std::mem::take(&mut ledger.tasks)
                    .into_iter()
                    .partition(|t| t.status == status);
                ledger.tasks = kept;
                Ok(removed)
            }))
            .await?;
        info!(count = removed.len(), "tasks deleted");
        Ok(removed)
    }
}

/// `base`, or `base-2`, `base-3`, ... whichever is free.
fn unique_name(ledger: &TaskLedger, base: &str) -> String {
    if !ledger.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !ledger.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn running_record<'a>(
    ledger: &'a mut TaskLedger,
    name: &str,
    to: TaskStatus,
) -> DomainResult<&'a mut TaskRecord> {
    let task = ledger
        .find_mut(name)
        .ok_or_else(|| DomainError::TaskNotFound(name.to_string()))?;
    if task.status != TaskStatus::Running {
        return Err(DomainError::InvalidStateTransition {
            name: name.to_string(),
            from: task.status.to_string(),
            to: to.to_string(),
        });
    }
    Ok(task)
}
