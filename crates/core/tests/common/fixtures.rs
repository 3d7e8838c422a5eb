//! Project harness for task lifecycle tests.

use crate::common::fakes::{FakeVcs, ScriptedAssistant};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tf_core::config::AppConfig;
use tf_core::sandbox::{MockBackend, SandboxManager};
use tf_core::state::manager::CreateTaskRequest;
use tf_core::state::TaskManager;
use tf_protocol::task_models::Task;
use tf_protocol::workflow_models::Workflow;

/// A temporary repository with a [`TaskManager`] wired to fakes.
///
/// Keep the harness alive for the duration of the test; dropping it removes
/// the project directory.
#[allow(dead_code)]
pub struct Harness {
    pub dir: TempDir,
    pub manager: TaskManager,
    pub backend: MockBackend,
    pub vcs: FakeVcs,
}

#[allow(dead_code)]
impl Harness {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

#[allow(dead_code)]
pub fn harness() -> Harness {
    harness_with(MockBackend::new(), FakeVcs::new(), ScriptedAssistant::new())
}

#[allow(dead_code)]
pub fn harness_with(backend: MockBackend, vcs: FakeVcs, assistant: ScriptedAssistant) -> Harness {
    harness_with_config(backend, vcs, assistant, |_| {})
}

/// Build a harness after letting `configure` adjust the defaults.
#[allow(dead_code)]
pub fn harness_with_config(
    backend: MockBackend,
    vcs: FakeVcs,
    assistant: ScriptedAssistant,
    configure: impl FnOnce(&mut AppConfig),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::with_builtins().unwrap();
    configure(&mut config);

    let sandbox = SandboxManager::new(Arc::new(backend.clone()), config.global.sandbox.clone())
        .with_home(None)
        .with_host_env(BTreeMap::new());
    let manager = TaskManager::new(
        dir.path(),
        config,
        sandbox,
        Arc::new(vcs.clone()),
        Arc::new(assistant),
    );

    Harness {
        dir,
        manager,
        backend,
        vcs,
    }
}

/// Workflow whose second step consumes the first one's output and which
/// requires a `ticket` input.
#[allow(dead_code)]
pub const REVIEW_WORKFLOW: &str = r#"
name: review
description: Plan then review
inputs:
  - name: description
    required: true
  - name: ticket
    required: true
  - name: focus
    default: correctness
steps:
  - id: plan
    prompt: "Plan {{inputs.ticket}}: {{inputs.description}}"
    outputs:
      - name: text
  - id: review
    prompt: "Review {{steps.plan.outputs.text}} for {{inputs.focus}}"
"#;

/// Harness whose library also holds [`REVIEW_WORKFLOW`].
#[allow(dead_code)]
pub fn harness_with_review_workflow() -> Harness {
    harness_with_config(
        MockBackend::new(),
        FakeVcs::new(),
        ScriptedAssistant::new(),
        |config| {
            config
                .workflows
                .insert(Workflow::from_yaml(REVIEW_WORKFLOW).unwrap());
        },
    )
}

/// Drive a new task through a successful run to `COMPLETED`.
#[allow(dead_code)]
pub async fn completed_task(harness: &Harness, description: &str) -> Task {
    let manager = &harness.manager;
    let task = manager
        .create_task(CreateTaskRequest::new(description).with_title(description))
        .await
        .unwrap();
    manager.start_task(task.id).await.unwrap();
    manager
        .iterations(task.id)
        .status_tracker(1)
        .unwrap()
        .complete("summarize")
        .unwrap();
    manager.wait_for_task(task.id, None).await.unwrap()
}
