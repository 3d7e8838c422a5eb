//! Structural validation of workflow definitions and their inputs.

use crate::workflow::template::Template;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tf_protocol::workflow_models::{InputType, Workflow};

/// One authoring problem found in a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowIssue {
    NoSteps,
    EmptyStepId { index: usize },
    DuplicateStepId(String),
    DuplicateInput(String),
    /// `location` references a step declared after it.
    ForwardReference { location: String, target: String },
    SelfReference { location: String },
    UnknownStep { location: String, target: String },
    UndeclaredStepOutput {
        location: String,
        step: String,
        output: String,
    },
    UndeclaredInput { location: String, input: String },
    MissingOutputFilename { output: String },
}

impl fmt::Display for WorkflowIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSteps => write!(f, "workflow has no steps"),
            Self::EmptyStepId { index } => write!(f, "step #{} has an empty id", index + 1),
            Self::DuplicateStepId(id) => write!(f, "step id '{id}' is used more than once"),
            Self::DuplicateInput(name) => write!(f, "input '{name}' is declared more than once"),
            Self::ForwardReference { location, target } => {
                write!(f, "{location} references step '{target}' which runs later")
            }
            Self::SelfReference { location } => write!(f, "{location} references its own outputs"),
            Self::UnknownStep { location, target } => {
                write!(f, "{location} references unknown step '{target}'")
            }
            Self::UndeclaredStepOutput {
                location,
                step,
                output,
            } => write!(f, "{location} references output '{output}' that step '{step}' does not declare"),
            Self::UndeclaredInput { location, input } => {
                write!(f, "{location} references undeclared input '{input}'")
            }
            Self::MissingOutputFilename { output } => {
                write!(f, "file output '{output}' has no filename")
            }
        }
    }
}

/// Collect every issue in `workflow`. An empty list means it is valid.
///
/// Step references must point strictly backwards in declaration order, which
/// lets the engine resolve prompts in a single forward pass.
pub fn validate_workflow(workflow: &Workflow) -> Vec<WorkflowIssue> {
    let mut issues = Vec::new();

    if workflow.steps.is_empty() {
        issues.push(WorkflowIssue::NoSteps);
    }

    let mut input_names = HashSet::new();
    for input in &workflow.inputs {
        if !input_names.insert(input.name.as_str()) {
            issues.push(WorkflowIssue::DuplicateInput(input.name.clone()));
        }
    }

    let mut seen_ids = HashSet::new();
    for (index, step) in workflow.steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            issues.push(WorkflowIssue::EmptyStepId { index });
        } else if !seen_ids.insert(step.id.as_str()) {
            issues.push(WorkflowIssue::DuplicateStepId(step.id.clone()));
        }
    }

    for (index, step) in workflow.steps.iter().enumerate() {
        let location = format!("step '{}'", step.id);
        let template = Template::parse(&step.prompt);
        check_inputs(workflow, &template, &location, &mut issues);

        for (target, output) in template.step_refs() {
            if target == step.id {
                issues.push(WorkflowIssue::SelfReference {
                    location: location.clone(),
                });
                continue;
            }
            match workflow.step_index(target) {
                None => issues.push(WorkflowIssue::UnknownStep {
                    location: location.clone(),
                    target: target.to_string(),
                }),
                Some(target_index) if target_index > index => {
                    issues.push(WorkflowIssue::ForwardReference {
                        location: location.clone(),
                        target: target.to_string(),
                    })
                }
                Some(target_index) => {
                    check_declared_output(workflow, target_index, output, &location, &mut issues)
                }
            }
        }
    }

    // Workflow outputs are resolved after every step ran.
    for output in &workflow.outputs {
        let location = format!("output '{}'", output.name);
        if output.output_type == tf_protocol::workflow_models::OutputType::File
            && output.filename.as_deref().map_or(true, |f| f.trim().is_empty())
        {
            issues.push(WorkflowIssue::MissingOutputFilename {
                output: output.name.clone(),
            });
        }
        let Some(value) = &output.value else { continue };
        let template = Template::parse(value);
        check_inputs(workflow, &template, &location, &mut issues);
        for (target, name) in template.step_refs() {
            match workflow.step_index(target) {
                None => issues.push(WorkflowIssue::UnknownStep {
                    location: location.clone(),
                    target: target.to_string(),
                }),
                Some(target_index) => {
                    check_declared_output(workflow, target_index, name, &location, &mut issues)
                }
            }
        }
    }

    issues
}

fn check_inputs(
    workflow: &Workflow,
    template: &Template,
    location: &str,
    issues: &mut Vec<WorkflowIssue>,
) {
    for input in template.input_refs() {
        if workflow.input(input).is_none() {
            issues.push(WorkflowIssue::UndeclaredInput {
                location: location.to_string(),
                input: input.to_string(),
            });
        }
    }
}

fn check_declared_output(
    workflow: &Workflow,
    target_index: usize,
    output: &str,
    location: &str,
    issues: &mut Vec<WorkflowIssue>,
) {
    let target = &workflow.steps[target_index];
    if target.output(output).is_none() {
        issues.push(WorkflowIssue::UndeclaredStepOutput {
            location: location.to_string(),
            step: target.id.clone(),
            output: output.to_string(),
        });
    }
}

/// Result of checking concrete input values against a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InputValidation {
    pub valid: bool,
    /// Required inputs with no value and no default.
    pub missing: Vec<String>,
    /// Inputs whose value does not match the declared type.
    pub invalid: Vec<String>,
}

impl fmt::Display for InputValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid {
            return write!(f, "inputs are valid");
        }
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing: {}", self.missing.join(", ")));
        }
        if !self.invalid.is_empty() {
            parts.push(format!("invalid: {}", self.invalid.join(", ")));
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// Check `values` against the workflow's declared inputs.
///
/// Never fails: every problem is reported together in the result.
pub fn validate_inputs(workflow: &Workflow, values: &BTreeMap<String, String>) -> InputValidation {
    let mut missing = Vec::new();
    let mut invalid = Vec::new();

    for input in &workflow.inputs {
        let value = values
            .get(&input.name)
            .filter(|v| !v.trim().is_empty())
            .or(input.default.as_ref());
        match value {
            None if input.required => missing.push(input.name.clone()),
            None => {}
            Some(value) => {
                if !type_matches(input.input_type, value) {
                    invalid.push(input.name.clone());
                }
            }
        }
    }

    InputValidation {
        valid: missing.is_empty() && invalid.is_empty(),
        missing,
        invalid,
    }
}

/// Supplied values plus defaults for every declared input left unset.
pub fn resolve_inputs(
    workflow: &Workflow,
    values: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut resolved = values.clone();
    for input in &workflow.inputs {
        let unset = resolved.get(&input.name).map_or(true, |v| v.trim().is_empty());
        if unset {
            if let Some(default) = &input.default {
                resolved.insert(input.name.clone(), default.clone());
            }
        }
    }
    resolved
}

fn type_matches(input_type: InputType, value: &str) -> bool {
    let value = value.trim();
    match input_type {
        InputType::String => true,
        InputType::Number => value.parse::<f64>().map_or(false, f64::is_finite),
        InputType::Boolean => matches!(value.to_lowercase().as_str(), "true" | "false"),
    }
}
