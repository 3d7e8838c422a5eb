//! Events emitted by the workflow engine while a run progresses.
//!
//! Observers (the iteration status tracker, the CLI) receive these over a
//! channel so that execution never blocks on presentation.

use serde::{Deserialize, Serialize};

/// Progress notifications for one workflow run.
///
/// Uses tagged enum serialization:
/// ```json
/// { "type": "stepStarted", "payload": { "step_id": "plan", "index": 0, "total": 2 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum RunEvent {
    /// The run began.
    RunStarted { workflow: String, total_steps: usize },

    /// A step was dispatched to its agent.
    StepStarted {
        step_id: String,
        name: String,
        index: usize,
        total: usize,
    },

    /// Output produced by the agent of a step.
    StepLog { step_id: String, content: String },

    /// A step finished and its outputs were recorded.
    StepCompleted { step_id: String, index: usize },

    /// A step failed or timed out. Its outputs are absent.
    StepFailed {
        step_id: String,
        index: usize,
        error: String,
    },

    /// The run finished. `success` is false if any step failed.
    RunFinished { success: bool },
}
