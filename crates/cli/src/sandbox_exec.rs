//! Workflow execution inside a sandbox.
//!
//! The sandbox entrypoint runs `taskforge sandbox-exec --dir <output>`. The
//! output directory holds the execution descriptor and workflow snapshot
//! written on the host, and receives the step artifacts and the iteration
//! status record.

use color_eyre::eyre::WrapErr;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tf_core::agents::AgentManager;
use tf_core::config::loader::load_workflow;
use tf_core::sandbox::descriptor::WORKFLOW_FILE;
use tf_core::sandbox::ExecutionDescriptor;
use tf_core::state::iteration::STATUS_FILE;
use tf_core::state::IterationStatusTracker;
use tf_core::workflow::{RunContext, RunReport, WorkflowEngine};
use tf_protocol::events::RunEvent;
use tf_protocol::iteration_models::IterationState;
use tf_protocol::workflow_models::Workflow;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub async fn run(dir: &Path) -> color_eyre::Result<RunReport> {
    let descriptor = ExecutionDescriptor::load(dir).wrap_err("cannot read execution descriptor")?;
    let workflow = load_workflow(&dir.join(WORKFLOW_FILE)).wrap_err("cannot read workflow")?;
    let workspace = match std::env::var_os("TASKFORGE_WORKSPACE") {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().wrap_err("cannot determine workspace")?,
    };
    let status_path = dir.join(STATUS_FILE);
    let tracker = match IterationStatusTracker::open(&status_path) {
        Ok(tracker) => tracker,
        Err(_) => IterationStatusTracker::create(&status_path, descriptor.task_id)
            .wrap_err("cannot create iteration status")?,
    };

    let tools = agent_tools(&workflow, &descriptor.agent);
    let agents = AgentManager::from_tools(tools.iter().map(String::as_str), descriptor.model.clone());
    let engine =
        WorkflowEngine::new(agents, descriptor.agent.clone()).with_default_model(descriptor.model.clone());
    let ctx = RunContext {
        inputs: descriptor.inputs.clone(),
        workspace,
        output_dir: dir.to_path_buf(),
    };

    info!(
        task_id = descriptor.task_id,
        iteration = descriptor.iteration,
        workflow = %workflow.name,
        "Running workflow"
    );
    let (tx, rx) = mpsc::channel(100);
    let (result, mut tracker) = tokio::join!(engine.run(&workflow, &ctx, tx), observe(rx, tracker));

    let outcome = match &result {
        Ok(report) if report.success => tracker.complete("done"),
        Ok(report) => {
            let errors: Vec<String> = report
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.step_id, f.error))
                .collect();
            let step = report
                .failures
                .first()
                .map(|f| f.step_id.clone())
                .unwrap_or_default();
            tracker.fail(&step, &errors.join("; "))
        }
        Err(e) => tracker.fail("validate", &e.to_string()),
    };
    if let Err(e) = outcome {
        warn!(error = %e, "Failed to record final iteration status");
    }
    Ok(result?)
}

/// Print progress and mirror it into the status record until the engine
/// drops its sender.
async fn observe(
    mut rx: mpsc::Receiver<RunEvent>,
    mut tracker: IterationStatusTracker,
) -> IterationStatusTracker {
    let mut total = 0usize;
    let mut finished = 0usize;
    while let Some(event) = rx.recv().await {
        let update = match &event {
            RunEvent::RunStarted { total_steps, .. } => {
                total = *total_steps;
                tracker.update(IterationState::Running, "starting", 0, None)
            }
            RunEvent::StepStarted { name, index, total: steps, .. } => {
                println!("==> [{}/{steps}] {name}", index + 1);
                tracker.update(
                    IterationState::Running,
                    name,
                    progress(finished, total),
                    None,
                )
            }
            RunEvent::StepLog { content, .. } => {
                print!("{content}");
                Ok(())
            }
            RunEvent::StepCompleted { step_id, .. } => {
                finished += 1;
                tracker.update(
                    IterationState::Running,
                    step_id,
                    progress(finished, total),
                    None,
                )
            }
            RunEvent::StepFailed { step_id, error, .. } => {
                finished += 1;
                eprintln!("step {step_id} failed: {error}");
                tracker.update(
                    IterationState::Running,
                    step_id,
                    progress(finished, total),
                    Some(error.clone()),
                )
            }
            RunEvent::RunFinished { success } => {
                println!("==> workflow {}", if *success { "succeeded" } else { "failed" });
                Ok(())
            }
        };
        if let Err(e) = update {
            warn!(error = %e, "Failed to update iteration status");
        }
    }
    tracker
}

fn progress(finished: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    u8::try_from(finished * 100 / total).unwrap_or(100)
}

/// Every agent tool the workflow can dispatch to.
fn agent_tools(workflow: &Workflow, default: &str) -> BTreeSet<String> {
    let mut tools = BTreeSet::from([default.to_string()]);
    tools.extend(workflow.defaults.tool.clone());
    tools.extend(workflow.steps.iter().filter_map(|s| s.tool.clone()));
    tools
}
