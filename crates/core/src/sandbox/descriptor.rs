//! Self-contained execution descriptor placed in the iteration directory.
//!
//! The sandbox sees the iteration directory at the configured output mount.
//! Inside it the entrypoint runs `taskforge sandbox-exec`, which reads
//! `inputs.json` and the `workflow.yaml` snapshot written here.

use crate::sandbox::error::{SandboxError, SandboxResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tf_protocol::iteration_models::Iteration;
use tf_protocol::task_models::Task;
use tf_protocol::workflow_models::Workflow;

pub const ENTRYPOINT_FILE: &str = "entrypoint.sh";
pub const INPUTS_FILE: &str = "inputs.json";
pub const WORKFLOW_FILE: &str = "workflow.yaml";

/// Everything `sandbox-exec` needs, serialized as `inputs.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDescriptor {
    pub task_id: u64,
    pub iteration: u32,
    pub workflow_name: String,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Workflow input values, including the built-in ones.
    pub inputs: BTreeMap<String, String>,
}

impl ExecutionDescriptor {
    /// Build the descriptor for `iteration` of `task`.
    ///
    /// Task inputs are extended with built-in values the workflow may
    /// reference: `description` and `title` of the iteration, the previous
    /// iteration's `previous_plan`/`previous_changes`, and `output_dir`.
    /// Values the user supplied explicitly are kept.
    pub fn new(
        task: &Task,
        iteration: &Iteration,
        model: Option<String>,
        output_mount: &str,
    ) -> Self {
        let mut inputs = task.inputs.clone();
        let mut builtin = |key: &str, value: String| {
            if iteration.iteration > 1 || !inputs.contains_key(key) {
                inputs.insert(key.to_string(), value);
            }
        };
        builtin("description", iteration.description.clone());
        builtin("title", iteration.title.clone());
        builtin("output_dir", output_mount.to_string());
        if let Some(context) = &iteration.previous_context {
            if let Some(plan) = &context.plan {
                builtin("previous_plan", plan.clone());
            }
            if let Some(changes) = &context.changes {
                builtin("previous_changes", changes.clone());
            }
        }

        Self {
            task_id: task.id,
            iteration: iteration.iteration,
            workflow_name: task.workflow_name.clone(),
            agent: task.agent.clone(),
            model,
            inputs,
        }
    }

    /// Read `inputs.json` from `dir`.
    pub fn load(dir: &Path) -> SandboxResult<Self> {
        let path = dir.join(INPUTS_FILE);
        let content = std::fs::read_to_string(&path).map_err(|source| SandboxError::Descriptor {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|e| SandboxError::Serialize(e.to_string()))
    }
}

/// Write `entrypoint.sh`, `inputs.json` and the workflow snapshot into `dir`.
pub fn write(
    dir: &Path,
    descriptor: &ExecutionDescriptor,
    workflow: &Workflow,
    workspace_mount: &str,
) -> SandboxResult<()> {
    std::fs::create_dir_all(dir).map_err(|source| SandboxError::Descriptor {
        path: dir.to_path_buf(),
        source,
    })?;

    let inputs = serde_json::to_string_pretty(descriptor)
        .map_err(|e| SandboxError::Serialize(e.to_string()))?;
    write_file(&dir.join(INPUTS_FILE), &inputs)?;

    let snapshot = workflow
        .to_canonical_yaml()
        .map_err(|e| SandboxError::Serialize(e.to_string()))?;
    write_file(&dir.join(WORKFLOW_FILE), &snapshot)?;

    let entrypoint = format!(
        "#!/bin/sh\n\
         # taskforge task {task} iteration {iteration}\n\
         set -eu\n\
         cd \"${{TASKFORGE_WORKSPACE:-{workspace_mount}}}\"\n\
         exec taskforge sandbox-exec --dir \"$TASKFORGE_OUTPUT\"\n",
        task = descriptor.task_id,
        iteration = descriptor.iteration,
    );
    let path = dir.join(ENTRYPOINT_FILE);
    write_file(&path, &entrypoint)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .map_err(|source| SandboxError::Descriptor { path, source })?;
    }
    Ok(())
}

fn write_file(path: &Path, content: &str) -> SandboxResult<()> {
    std::fs::write(path, content).map_err(|source| SandboxError::Descriptor {
        path: path.to_path_buf(),
        source,
    })
}
