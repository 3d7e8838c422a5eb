//! Declarative workflow validation and execution.

pub mod engine;
pub mod error;
pub mod template;
pub mod validation;

pub use engine::{RunContext, RunReport, StepFailure, WorkflowEngine};
pub use error::{WorkflowError, WorkflowResult};
pub use template::{Segment, StepOutputs, Template};
pub use validation::{
    resolve_inputs, validate_inputs, validate_workflow, InputValidation, WorkflowIssue,
};
