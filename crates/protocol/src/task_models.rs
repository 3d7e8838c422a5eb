//! Task record models for `.taskforge/tasks/<id>/task.json`.
//!
//! A task is one unit of delegated work. Its record is the single source of
//! truth for lifecycle status and execution metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Schema version written into every new task record.
pub const TASK_SCHEMA_VERSION: &str = "1.1";

/// Lifecycle status of a task.
///
/// Normal flow:
/// `New -> InProgress -> Completed -> Merged -> Pushed`
///
/// Refinement loops through `Iterating`, and `Failed` can return to `New`
/// through a restart.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, waiting for a sandbox.
    New,

    /// The agent is running inside a sandbox.
    InProgress,

    /// The agent finished successfully.
    Completed,

    /// A refinement cycle is running on top of earlier output.
    Iterating,

    /// The agent or its sandbox failed.
    Failed,

    /// The task branch has been merged into the target branch.
    Merged,

    /// The merged result has been pushed to the remote.
    Pushed,
}

impl TaskStatus {
    /// Returns true if the lifecycle allows moving from `self` to `next`.
    ///
    /// `New -> New` is allowed so that restart and reset stay idempotent.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::{Completed, Failed, InProgress, Iterating, Merged, New, Pushed};
        matches!(
            (self, next),
            (New, InProgress)
                | (InProgress, Completed | Failed)
                | (Completed | Failed, Iterating)
                | (Iterating, Completed | Failed)
                | (Completed, Merged)
                | (Merged, Pushed)
                | (New | InProgress | Iterating | Failed, New)
        )
    }

    /// Statuses from which a restart is accepted.
    pub fn is_restartable(self) -> bool {
        matches!(self, TaskStatus::New | TaskStatus::Failed)
    }

    /// Statuses that have a live or pending sandbox.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Iterating)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::New => "NEW",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Iterating => "ITERATING",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Merged => "MERGED",
            TaskStatus::Pushed => "PUSHED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the sandbox that runs the task, as last observed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// No sandbox has been created yet.
    #[default]
    Pending,
    /// The sandbox is created and started.
    Running,
    /// The sandbox process exited on its own.
    Exited,
    /// The sandbox was stopped by the engine (timeout or user request).
    Stopped,
    /// The sandbox has been removed.
    Removed,
}

/// Durable state of one task.
///
/// Field names are serialized in camelCase to keep `task.json` stable across
/// tooling that reads it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Sequential task number, allocated from the shared counter.
    pub id: u64,

    /// Globally unique identifier.
    pub uuid: Uuid,

    pub title: String,

    pub description: String,

    /// Name of the workflow this task runs.
    pub workflow_name: String,

    /// Agent tool used inside the sandbox (e.g. "claude").
    pub agent: String,

    /// Workflow input values, keyed by input name.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,

    /// Branch the task branch was created from, and merged back into.
    pub source_branch: String,

    /// Task branch checked out in the isolated working copy.
    pub branch_name: String,

    /// Absolute path of the isolated working copy.
    pub worktree_path: String,

    /// Identifier of the current sandbox, if one exists.
    #[serde(default)]
    pub container_id: Option<String>,

    #[serde(default)]
    pub execution_status: ExecutionStatus,

    pub status: TaskStatus,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// Time the agent originally completed. Never moved by merge or push.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,

    /// Number of refinement cycles, including the initial run. Always >= 1.
    pub iterations: u32,

    /// Number of accepted restarts. Only the restart operation changes it.
    #[serde(default)]
    pub restart_count: u32,

    #[serde(default)]
    pub last_restart_at: Option<DateTime<Utc>>,

    /// `Major.Minor` schema version of this record.
    pub version: String,
}

impl Task {
    /// Name of the sandbox that runs this task.
    pub fn sandbox_name(&self) -> String {
        format!("taskforge-task-{}", self.id)
    }
}
