//! Error types for workflow validation and execution.

use crate::workflow::validation::{InputValidation, WorkflowIssue};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    /// The definition violates an authoring rule.
    #[error("Workflow '{workflow}' is invalid: {}", join_issues(.issues))]
    Invalid {
        workflow: String,
        issues: Vec<WorkflowIssue>,
    },

    /// Supplied input values do not satisfy the workflow.
    #[error("Workflow '{workflow}' inputs rejected ({validation})")]
    InvalidInputs {
        workflow: String,
        validation: InputValidation,
    },

    /// No workflow with this name is loaded.
    #[error("Workflow '{0}' not found")]
    NotFound(String),

    /// A workflow output could not be written.
    #[error("Failed to write workflow output {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize workflow: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

fn join_issues(issues: &[WorkflowIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
