//! Task state machine.
//!
//! [`TaskRecord`] wraps a persisted [`Task`] and is the only way the engine
//! changes a task's lifecycle. Every setter validates the transition, writes
//! the status and its timestamp, and persists the record before returning.

use crate::state::error::{StoreResult, TransitionError};
use crate::state::files::write_json;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tf_protocol::task_models::{ExecutionStatus, Task, TaskStatus};
use tracing::{debug, info};

/// A task record bound to its `task.json` location.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    task: Task,
    path: PathBuf,
}

impl TaskRecord {
    pub(crate) fn new(task: Task, path: PathBuf) -> Self {
        Self { task, path }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn id(&self) -> u64 {
        self.task.id
    }

    pub fn status(&self) -> TaskStatus {
        self.task.status
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding `task.json` and `iterations/`.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn into_task(self) -> Task {
        self.task
    }

    /// Write the record to disk.
    pub fn save(&self) -> StoreResult<()> {
        write_json(&self.path, &self.task)
    }

    pub fn mark_in_progress(&mut self) -> StoreResult<()> {
        self.transition(TaskStatus::InProgress)?;
        self.task.started_at = Some(Utc::now());
        self.save()
    }

    pub fn mark_completed(&mut self) -> StoreResult<()> {
        self.transition(TaskStatus::Completed)?;
        self.task.completed_at = Some(Utc::now());
        self.save()
    }

    pub fn mark_iterating(&mut self) -> StoreResult<()> {
        self.transition(TaskStatus::Iterating)?;
        self.task.started_at = Some(Utc::now());
        self.save()
    }

    pub fn mark_failed(&mut self) -> StoreResult<()> {
        self.transition(TaskStatus::Failed)?;
        self.task.failed_at = Some(Utc::now());
        self.save()
    }

    /// Record the merge. `completed_at` keeps the original agent completion
    /// time and is only filled in if it was never set.
    pub fn mark_merged(&mut self) -> StoreResult<()> {
        self.transition(TaskStatus::Merged)?;
        let now = Utc::now();
        self.task.merged_at = Some(now);
        self.task.completed_at.get_or_insert(now);
        self.save()
    }

    /// Record the push. Like [`mark_merged`](Self::mark_merged), never moves
    /// an existing `completed_at`.
    pub fn mark_pushed(&mut self) -> StoreResult<()> {
        self.transition(TaskStatus::Pushed)?;
        let now = Utc::now();
        self.task.pushed_at = Some(now);
        self.task.completed_at.get_or_insert(now);
        self.save()
    }

    /// Restart a task that has not started or has failed.
    ///
    /// Any other status is rejected and the record is left untouched.
    pub fn restart(&mut self, timestamp: DateTime<Utc>) -> StoreResult<()> {
        if !self.task.status.is_restartable() {
            return Err(TransitionError {
                task_id: self.task.id,
                from: self.task.status,
                to: TaskStatus::New,
            }
            .into());
        }
        self.task.status = TaskStatus::New;
        self.task.restart_count += 1;
        self.task.last_restart_at = Some(timestamp);
        self.clear_sandbox();
        info!(task_id = self.task.id, restarts = self.task.restart_count, "Task restarted");
        self.save()
    }

    /// Return a task whose sandbox could not be created or started to `New`.
    ///
    /// Only `New`, `InProgress` and `Iterating` can be reset. A failed task
    /// goes back to `New` through [`restart`](Self::restart).
    pub fn reset_to_new(&mut self) -> StoreResult<()> {
        if self.task.status == TaskStatus::Failed {
            return Err(TransitionError {
                task_id: self.task.id,
                from: self.task.status,
                to: TaskStatus::New,
            }
            .into());
        }
        self.transition(TaskStatus::New)?;
        self.task.started_at = None;
        self.clear_sandbox();
        info!(task_id = self.task.id, "Task reset to NEW after sandbox failure");
        self.save()
    }

    /// Count a new refinement cycle and return its number.
    pub fn increment_iteration(&mut self) -> StoreResult<u32> {
        self.task.iterations += 1;
        self.save()?;
        Ok(self.task.iterations)
    }

    /// Record the sandbox identity and state.
    pub fn set_sandbox(
        &mut self,
        container_id: Option<String>,
        execution_status: ExecutionStatus,
    ) -> StoreResult<()> {
        self.task.container_id = container_id;
        self.task.execution_status = execution_status;
        self.save()
    }

    pub fn set_execution_status(&mut self, execution_status: ExecutionStatus) -> StoreResult<()> {
        self.task.execution_status = execution_status;
        self.save()
    }

    fn clear_sandbox(&mut self) {
        self.task.container_id = None;
        self.task.execution_status = ExecutionStatus::Pending;
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), TransitionError> {
        let from = self.task.status;
        if !from.can_transition_to(next) {
            return Err(TransitionError {
                task_id: self.task.id,
                from,
                to: next,
            });
        }
        debug!(task_id = self.task.id, %from, to = %next, "Task transition");
        self.task.status = next;
        Ok(())
    }
}
