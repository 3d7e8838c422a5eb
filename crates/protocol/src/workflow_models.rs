//! Workflow definition models for `.taskforge/workflows/*.yaml`.
//!
//! A workflow is an ordered list of agent steps with typed inputs and
//! outputs. Steps may reference the outputs of earlier steps through
//! `{{steps.<id>.outputs.<name>}}` placeholders and workflow inputs through
//! `{{inputs.<name>}}`.

use serde::{Deserialize, Serialize};

/// Declared type of a workflow input.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    String,
    Number,
    Boolean,
}

/// A named input a workflow accepts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowInput {
    pub name: String,

    #[serde(rename = "type", default)]
    pub input_type: InputType,

    #[serde(default)]
    pub required: bool,

    /// Value used when the caller supplies none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Kind of value an output carries.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// Free text held in memory.
    #[default]
    Text,
    /// Content backed by a file in the iteration output directory.
    File,
}

/// A workflow-level output, populated once all steps have run.
///
/// # Example
///
/// ```yaml
/// outputs:
///   - name: plan
///     type: file
///     filename: plan.md
///     value: "{{steps.plan.outputs.plan}}"
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowOutput {
    pub name: String,

    #[serde(rename = "type", default)]
    pub output_type: OutputType,

    /// Target filename inside the iteration output directory (file outputs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Template producing the output value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Kind of a workflow step. Only agent steps exist today.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    #[default]
    Agent,
}

/// An output produced by a single step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub name: String,

    #[serde(rename = "type", default)]
    pub output_type: OutputType,

    /// File the agent is asked to write, relative to the output directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// One step of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Step {
    /// Unique within the workflow.
    pub id: String,

    #[serde(rename = "type", default)]
    pub step_type: StepType,

    #[serde(default)]
    pub name: String,

    /// Prompt template sent to the agent.
    pub prompt: String,

    #[serde(default)]
    pub outputs: Vec<StepOutput>,

    /// Agent tool override (falls back to `defaults.tool`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Model override for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Timeout in seconds (falls back to `config.timeout`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Step {
    /// Name shown in progress reports.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn output(&self, name: &str) -> Option<&StepOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

/// Workflow-wide defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct WorkflowDefaults {
    /// Default agent tool for steps without a `tool` override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Execution policy of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    /// Default step timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Keep running later steps after a step fails.
    #[serde(default)]
    pub continue_on_error: bool,
}

/// A declarative, ordered multi-step agent pipeline.
///
/// # Example
///
/// ```yaml
/// name: default
/// description: Plan then implement
/// version: "1.0"
/// inputs:
///   - name: description
///     required: true
/// steps:
///   - id: plan
///     prompt: "Plan: {{inputs.description}}"
///     outputs:
///       - name: plan
///   - id: implement
///     prompt: "Implement this plan: {{steps.plan.outputs.plan}}"
/// defaults:
///   tool: claude
/// config:
///   timeout: 1800
///   continueOnError: false
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Workflow {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_workflow_version")]
    pub version: String,

    #[serde(default)]
    pub inputs: Vec<WorkflowInput>,

    #[serde(default)]
    pub outputs: Vec<WorkflowOutput>,

    pub steps: Vec<Step>,

    #[serde(default)]
    pub defaults: WorkflowDefaults,

    #[serde(default)]
    pub config: WorkflowConfig,
}

fn default_workflow_version() -> String {
    "1.0".to_string()
}

impl Workflow {
    /// Parse a workflow from its YAML form.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Export the canonical text form archived alongside iteration artifacts.
    ///
    /// Field order follows the struct definition, so two equal workflows
    /// always export to the same text.
    pub fn to_canonical_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn input(&self, name: &str) -> Option<&WorkflowInput> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Position of a step in declaration order.
    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }
}
