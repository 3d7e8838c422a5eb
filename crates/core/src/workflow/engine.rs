//! Workflow execution engine.
//!
//! The engine validates a workflow and its inputs, then runs the steps in
//! declaration order, dispatching each resolved prompt to an agent through
//! the [`AgentManager`]. Progress is reported as [`RunEvent`]s over a
//! channel so observers never block execution.

use crate::agents::base::{AgentEvent, ExecutionContext};
use crate::agents::manager::AgentManager;
use crate::workflow::error::{WorkflowError, WorkflowResult};
use crate::workflow::template::{StepOutputs, Template};
use crate::workflow::validation::{resolve_inputs, validate_inputs, validate_workflow};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tf_protocol::events::RunEvent;
use tf_protocol::workflow_models::{OutputType, Step, Workflow};
use tokio::sync::mpsc::Sender;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, warn};

/// Concrete values and locations for one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub inputs: BTreeMap<String, String>,
    /// Working directory handed to the agent.
    pub workspace: PathBuf,
    /// Iteration output directory; file outputs are read from and written here.
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step_id: String,
    pub error: String,
}

/// Outcome of a run. Step failures are data, not errors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub completed_steps: usize,
    pub step_outputs: StepOutputs,
    /// Resolved workflow outputs by name.
    pub outputs: BTreeMap<String, String>,
    pub failures: Vec<StepFailure>,
}

pub struct WorkflowEngine {
    agents: AgentManager,
    default_tool: String,
    default_model: Option<String>,
}

impl WorkflowEngine {
    /// `default_tool` is used when neither the step nor the workflow
    /// defaults name a tool.
    pub fn new(agents: AgentManager, default_tool: impl Into<String>) -> Self {
        Self {
            agents,
            default_tool: default_tool.into(),
            default_model: None,
        }
    }

    pub fn with_default_model(mut self, model: Option<String>) -> Self {
        self.default_model = model;
        self
    }

    /// Execute `workflow` and return the populated outputs.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError` before any step runs if the definition or the
    /// inputs are invalid, or if a workflow file output cannot be written.
    /// Step failures are reported in the [`RunReport`].
    #[instrument(skip_all, fields(workflow = %workflow.name))]
    pub async fn run(
        &self,
        workflow: &Workflow,
        ctx: &RunContext,
        events_tx: Sender<RunEvent>,
    ) -> WorkflowResult<RunReport> {
        let issues = validate_workflow(workflow);
        if !issues.is_empty() {
            return Err(WorkflowError::Invalid {
                workflow: workflow.name.clone(),
                issues,
            });
        }
        let validation = validate_inputs(workflow, &ctx.inputs);
        if !validation.valid {
            return Err(WorkflowError::InvalidInputs {
                workflow: workflow.name.clone(),
                validation,
            });
        }
        let inputs = resolve_inputs(workflow, &ctx.inputs);

        let total = workflow.steps.len();
        let _ = events_tx
            .send(RunEvent::RunStarted {
                workflow: workflow.name.clone(),
                total_steps: total,
            })
            .await;

        let mut report = RunReport::default();
        let mut aborted = false;

        for (index, step) in workflow.steps.iter().enumerate() {
            let _ = events_tx
                .send(RunEvent::StepStarted {
                    step_id: step.id.clone(),
                    name: step.display_name().to_string(),
                    index,
                    total,
                })
                .await;

            // Pass 1 happens per step so earlier outputs are visible in pass 2.
            let prompt = Template::parse(&step.prompt)
                .fill_inputs(&inputs)
                .fill_outputs(&report.step_outputs);

            match self
                .run_step(workflow, step, prompt, ctx, &events_tx)
                .await
            {
                Ok(outputs) => {
                    report.step_outputs.insert(step.id.clone(), outputs);
                    report.completed_steps += 1;
                    let _ = events_tx
                        .send(RunEvent::StepCompleted {
                            step_id: step.id.clone(),
                            index,
                        })
                        .await;
                }
                Err(error) => {
                    warn!(step = %step.id, %error, "Step failed");
                    let _ = events_tx
                        .send(RunEvent::StepFailed {
                            step_id: step.id.clone(),
                            index,
                            error: error.clone(),
                        })
                        .await;
                    report.failures.push(StepFailure {
                        step_id: step.id.clone(),
                        error,
                    });
                    if !workflow.config.continue_on_error {
                        aborted = true;
                        break;
                    }
                }
            }
        }

        if !aborted {
            report.outputs = self.write_outputs(workflow, &inputs, &report.step_outputs, ctx)?;
        }
        report.success = report.failures.is_empty();
        info!(
            success = report.success,
            completed = report.completed_steps,
            total,
            "Workflow finished"
        );
        let _ = events_tx
            .send(RunEvent::RunFinished {
                success: report.success,
            })
            .await;

        Ok(report)
    }

    /// Run one step under its timeout and collect its declared outputs.
    async fn run_step(
        &self,
        workflow: &Workflow,
        step: &Step,
        prompt: String,
        ctx: &RunContext,
        events_tx: &Sender<RunEvent>,
    ) -> Result<BTreeMap<String, String>, String> {
        let tool = step
            .tool
            .as_deref()
            .or(workflow.defaults.tool.as_deref())
            .unwrap_or(&self.default_tool);
        let model = step
            .model
            .clone()
            .or_else(|| workflow.defaults.model.clone())
            .or_else(|| self.default_model.clone());
        let context = ExecutionContext::new(prompt)
            .with_project_path(ctx.workspace.clone())
            .with_model(model);

        debug!(step = %step.id, tool, "Dispatching step");
        let execution = self.execute_agent(tool, &step.id, &context, events_tx);
        let message = match step.timeout.or(workflow.config.timeout) {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), execution)
                .await
                .unwrap_or_else(|_| Err(format!("timed out after {secs}s")))?,
            None => execution.await?,
        };

        let mut outputs = BTreeMap::new();
        for output in &step.outputs {
            let value = match output.output_type {
                OutputType::Text => message.clone(),
                OutputType::File => {
                    let relative = output.path.as_deref().unwrap_or(&output.name);
                    let path = safe_join(&ctx.output_dir, relative)
                        .ok_or_else(|| format!("output path '{relative}' escapes the output directory"))?;
                    tokio::fs::read_to_string(&path).await.map_err(|e| {
                        format!("declared output '{}' was not produced at {}: {e}", output.name, path.display())
                    })?
                }
            };
            outputs.insert(output.name.clone(), value);
        }
        Ok(outputs)
    }

    /// Stream one agent invocation, forwarding logs, and return its message.
    async fn execute_agent(
        &self,
        tool: &str,
        step_id: &str,
        context: &ExecutionContext,
        events_tx: &Sender<RunEvent>,
    ) -> Result<String, String> {
        let mut stream = self
            .agents
            .execute(tool, context)
            .await
            .map_err(|e| e.to_string())?;

        let mut message = String::new();
        while let Some(event) = stream.next().await {
            let content = match event.map_err(|e| e.to_string())? {
                AgentEvent::Thought(thought) => format!("[Thought] {thought}"),
                AgentEvent::ToolCall(call) => format!("[Tool Call] {call}"),
                AgentEvent::MessageChunk(chunk) => {
                    message.push_str(&chunk);
                    chunk
                }
                AgentEvent::Completed => break,
            };
            let _ = events_tx
                .send(RunEvent::StepLog {
                    step_id: step_id.to_string(),
                    content,
                })
                .await;
        }
        Ok(message)
    }

    fn write_outputs(
        &self,
        workflow: &Workflow,
        inputs: &BTreeMap<String, String>,
        step_outputs: &StepOutputs,
        ctx: &RunContext,
    ) -> WorkflowResult<BTreeMap<String, String>> {
        let mut resolved = BTreeMap::new();
        for output in &workflow.outputs {
            let value = output
                .value
                .as_deref()
                .map(|v| Template::parse(v).render(inputs, step_outputs))
                .unwrap_or_default();

            if output.output_type == OutputType::File {
                let filename = output.filename.as_deref().unwrap_or(&output.name);
                let path = safe_join(&ctx.output_dir, filename).ok_or_else(|| {
                    WorkflowError::OutputWrite {
                        path: PathBuf::from(filename),
                        source: std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            "path escapes the output directory",
                        ),
                    }
                })?;
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|source| WorkflowError::OutputWrite {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                std::fs::write(&path, &value).map_err(|source| WorkflowError::OutputWrite {
                    path: path.clone(),
                    source,
                })?;
                debug!(output = %output.name, path = %path.display(), "Wrote workflow output");
            }
            resolved.insert(output.name.clone(), value);
        }
        Ok(resolved)
    }
}

/// Join a relative path under `base`, rejecting absolute paths and `..`.
fn safe_join(base: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || relative.as_os_str().is_empty() {
        None
    } else {
        Some(base.join(relative))
    }
}
