//! Iteration models for `.taskforge/tasks/<id>/iterations/<n>/`.
//!
//! Every refinement request creates a new iteration. The iteration record is
//! immutable once written; progress is tracked in its companion
//! [`IterationStatus`] record (`status.json`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written into iteration and status records.
pub const ITERATION_SCHEMA_VERSION: &str = "1.0";

/// Artifacts carried over from the prior iteration.
///
/// Both artifact fields are optional: a missing or unreadable file leaves the
/// field absent instead of failing the new iteration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PreviousContext {
    /// Contents of the prior iteration's `plan.md`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,

    /// Contents of the prior iteration's `changes.md`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<String>,

    /// Iteration the artifacts were read from.
    pub iteration_number: u32,
}

impl PreviousContext {
    /// True if no artifact could be read.
    pub fn is_empty(&self) -> bool {
        self.plan.is_none() && self.changes.is_none()
    }
}

/// One refinement cycle of a task (`iteration.json`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
    /// Owning task id.
    pub id: u64,

    /// 1-based iteration number, strictly increasing per task.
    pub iteration: u32,

    pub title: String,

    pub description: String,

    pub created_at: DateTime<Utc>,

    /// Context chained from the prior iteration. Absent for iteration 1.
    #[serde(default)]
    pub previous_context: Option<PreviousContext>,

    pub version: String,
}

/// Execution state of an iteration.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IterationState {
    Initializing,
    Running,
    Completed,
    Failed,
}

impl IterationState {
    /// True once the iteration can no longer make progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, IterationState::Completed | IterationState::Failed)
    }
}

/// Mutable progress record of an iteration (`status.json`).
///
/// `progress` only reaches 100 when `status` is terminal, and `updated_at`
/// strictly increases with every write.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IterationStatus {
    pub task_id: u64,

    pub status: IterationState,

    /// Human-readable description of what is happening now.
    pub current_step: String,

    /// Percentage in `0..=100`.
    pub progress: u8,

    pub started_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub error: Option<String>,

    pub version: String,
}
