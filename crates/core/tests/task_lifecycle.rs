//! Task lifecycle scenarios against in-memory git and sandbox backends.

mod common;

use common::*;
use std::time::Duration;
use tf_core::error::{ErrorKind, TaskError};
use tf_core::sandbox::{MockBackend, SandboxOp};
use tf_core::state::manager::CreateTaskRequest;
use tf_core::state::StoreError;
use tf_protocol::iteration_models::IterationState;
use tf_protocol::task_models::{ExecutionStatus, TaskStatus};

/// Point a stored task at a workflow that is not in the library.
fn detach_workflow(h: &Harness, task_id: u64) {
    let path = h.manager.store().task_path(task_id);
    let mut record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    record["workflowName"] = serde_json::Value::String("gone".to_string());
    std::fs::write(&path, serde_json::to_string_pretty(&record).unwrap()).unwrap();
}

#[tokio::test]
async fn test_create_task_persists_new_task_with_first_iteration() {
    let h = harness_with(
        MockBackend::new(),
        FakeVcs::new(),
        ScriptedAssistant::new().with_summary("Fix login", "Users cannot log in with SSO."),
    );

    let task = h
        .manager
        .create_task(CreateTaskRequest::new("fix the sso login thing"))
        .await
        .unwrap();

    assert_eq!(task.id, 1);
    assert_eq!(task.title, "Fix login");
    assert_eq!(task.status, TaskStatus::New);
    assert_eq!(task.workflow_name, "default");
    assert_eq!(task.source_branch, "main");
    assert_eq!(task.branch_name, "taskforge/task-1");
    assert_eq!(task.iterations, 1);
    assert!(task.worktree_path.ends_with("task-1"));
    assert!(task.container_id.is_none());

    let iteration = h.manager.iterations(1).load(1).unwrap();
    assert_eq!(iteration.iteration, 1);
    assert!(iteration.previous_context.is_none());

    // No sandbox or worktree work happens before the task is started.
    assert!(h.backend.calls().is_empty());
    assert!(h.vcs.calls().is_empty());
}

#[tokio::test]
async fn test_create_task_ids_are_sequential() {
    let h = harness();

    let first = h
        .manager
        .create_task(CreateTaskRequest::new("one").with_title("One"))
        .await
        .unwrap();
    let second = h
        .manager
        .create_task(CreateTaskRequest::new("two").with_title("Two"))
        .await
        .unwrap();

    assert_eq!((first.id, second.id), (1, 2));
    let listed: Vec<u64> = h.manager.list_tasks().unwrap().iter().map(|t| t.id).collect();
    assert_eq!(listed, vec![1, 2]);
}

#[tokio::test]
async fn test_create_task_falls_back_when_assistant_unavailable() {
    let h = harness();

    let task = h
        .manager
        .create_task(CreateTaskRequest::new("Add retries\n\nWrap the HTTP client."))
        .await
        .unwrap();

    assert_eq!(task.title, "Add retries");
}

/// RED: invalid inputs must be rejected before anything is persisted.
#[tokio::test]
async fn test_create_task_rejects_missing_required_input() {
    let h = harness_with_review_workflow();

    let result = h
        .manager
        .create_task(
            CreateTaskRequest::new("review the parser")
                .with_title("Review")
                .with_workflow("review"),
        )
        .await;

    match result {
        Err(err @ TaskError::InvalidInputs { .. }) => {
            assert_eq!(err.kind(), ErrorKind::Validation);
            if let TaskError::InvalidInputs { validation, .. } = err {
                assert_eq!(validation.missing, vec!["ticket".to_string()]);
            }
        }
        other => panic!("expected InvalidInputs, got {other:?}"),
    }
    assert!(h.manager.list_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_task_accepts_declared_inputs() {
    let h = harness_with_review_workflow();

    let task = h
        .manager
        .create_task(
            CreateTaskRequest::new("review the parser")
                .with_title("Review")
                .with_workflow("review")
                .with_input("ticket", "TF-12"),
        )
        .await
        .unwrap();

    assert_eq!(task.workflow_name, "review");
    assert_eq!(task.inputs.get("ticket").map(String::as_str), Some("TF-12"));
}

#[tokio::test]
async fn test_create_task_unknown_workflow() {
    let h = harness();

    let result = h
        .manager
        .create_task(CreateTaskRequest::new("x").with_workflow("nope"))
        .await;

    assert!(matches!(result, Err(TaskError::Config(_))));
}

#[tokio::test]
async fn test_start_task_creates_worktree_and_runs_sandbox() {
    let h = harness();
    let task = h
        .manager
        .create_task(CreateTaskRequest::new("do it").with_title("Do it"))
        .await
        .unwrap();

    let started = h.manager.start_task(task.id).await.unwrap();

    assert_eq!(started.status, TaskStatus::InProgress);
    assert_eq!(started.execution_status, ExecutionStatus::Running);
    assert!(started.started_at.is_some());
    assert!(started.container_id.is_some());
    assert!(h.vcs.calls()[0].starts_with("worktree add"));

    let container = h.backend.container("taskforge-task-1").unwrap();
    assert!(container.running);
    assert_eq!(
        container.spec.labels.get("taskforge.task-id").map(String::as_str),
        Some("1")
    );

    let iteration_dir = h.manager.iterations(1).iteration_dir(1);
    assert!(iteration_dir.join("inputs.json").is_file());
    assert!(iteration_dir.join("workflow.yaml").is_file());
    assert!(iteration_dir.join("entrypoint.sh").is_file());
}

#[tokio::test]
async fn test_successful_run_completes_task() {
    let h = harness();

    let task = completed_task(&h, "Ship it").await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.execution_status, ExecutionStatus::Exited);
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn test_nonzero_exit_fails_task_and_iteration() {
    let h = harness_with(
        MockBackend::new().with_exit_code(2),
        FakeVcs::new(),
        ScriptedAssistant::new(),
    );
    let task = h
        .manager
        .create_task(CreateTaskRequest::new("x").with_title("X"))
        .await
        .unwrap();
    h.manager.start_task(task.id).await.unwrap();

    let task = h.manager.wait_for_task(task.id, None).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.failed_at.is_some());
    let status = h.manager.iterations(1).read_status(1).unwrap();
    assert_eq!(status.status, IterationState::Failed);
    assert!(status.error.unwrap().contains("code 2"));
}

#[tokio::test]
async fn test_exit_without_reported_completion_fails_task() {
    let h = harness();
    let task = h
        .manager
        .create_task(CreateTaskRequest::new("x").with_title("X"))
        .await
        .unwrap();
    h.manager.start_task(task.id).await.unwrap();

    let task = h.manager.wait_for_task(task.id, None).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
}

/// RED: a sandbox that cannot be created must leave the task restartable
/// and no container behind.
#[tokio::test]
async fn test_sandbox_create_failure_resets_task_to_new() {
    let h = harness_with(
        MockBackend::new()
            .fail_on(SandboxOp::Create)
            .leave_residue_on_create_failure(),
        FakeVcs::new(),
        ScriptedAssistant::new(),
    );
    let task = h
        .manager
        .create_task(CreateTaskRequest::new("x").with_title("X"))
        .await
        .unwrap();

    let err = h.manager.start_task(task.id).await.unwrap_err();

    assert!(matches!(err, TaskError::Sandbox { op: "create", .. }));
    assert_eq!(err.kind(), ErrorKind::Environment);
    assert_eq!(err.remediation().as_deref(), Some("taskforge restart 1"));
    assert!(h.backend.container_names().is_empty());

    let reloaded = h.manager.show_task(task.id).unwrap().task;
    assert_eq!(reloaded.status, TaskStatus::New);
    assert!(reloaded.container_id.is_none());
}

#[tokio::test]
async fn test_sandbox_start_failure_removes_container() {
    let h = harness_with(
        MockBackend::new().fail_on(SandboxOp::Start),
        FakeVcs::new(),
        ScriptedAssistant::new(),
    );
    let task = h
        .manager
        .create_task(CreateTaskRequest::new("x").with_title("X"))
        .await
        .unwrap();

    let err = h.manager.start_task(task.id).await.unwrap_err();

    assert!(matches!(err, TaskError::Sandbox { op: "start", .. }));
    assert!(h.backend.container_names().is_empty());
    let reloaded = h.manager.show_task(task.id).unwrap().task;
    assert_eq!(reloaded.status, TaskStatus::New);
}

#[tokio::test]
async fn test_worktree_failure_leaves_task_new() {
    let h = harness_with(
        MockBackend::new(),
        FakeVcs::new().failing_worktrees(),
        ScriptedAssistant::new(),
    );
    let task = h
        .manager
        .create_task(CreateTaskRequest::new("x").with_title("X"))
        .await
        .unwrap();

    let err = h.manager.start_task(task.id).await.unwrap_err();

    assert!(matches!(err, TaskError::Worktree { task_id: 1, .. }));
    assert!(h.backend.calls().is_empty());
    assert_eq!(h.manager.show_task(1).unwrap().task.status, TaskStatus::New);
}

#[tokio::test]
async fn test_start_with_unknown_workflow_leaves_task_new() {
    let h = harness();
    let task = h
        .manager
        .create_task(CreateTaskRequest::new("x").with_title("X"))
        .await
        .unwrap();
    detach_workflow(&h, task.id);

    let err = h.manager.start_task(task.id).await.unwrap_err();

    assert!(matches!(err, TaskError::Config(_)));
    assert!(h.backend.calls().is_empty());
    let reloaded = h.manager.show_task(task.id).unwrap().task;
    assert_eq!(reloaded.status, TaskStatus::New);
    assert!(reloaded.started_at.is_none());

    let restarted = h.manager.restart_task(task.id).await.unwrap();
    assert_eq!(restarted.status, TaskStatus::New);
}

#[tokio::test]
async fn test_start_rejected_unless_new() {
    let h = harness();
    let task = completed_task(&h, "Done").await;

    let err = h.manager.start_task(task.id).await.unwrap_err();

    assert!(matches!(err, TaskError::Store(StoreError::Transition(_))));
}

#[tokio::test]
async fn test_restart_failed_task() {
    let h = harness_with(
        MockBackend::new().with_exit_code(1),
        FakeVcs::new(),
        ScriptedAssistant::new(),
    );
    let task = h
        .manager
        .create_task(CreateTaskRequest::new("x").with_title("X"))
        .await
        .unwrap();
    h.manager.start_task(task.id).await.unwrap();
    h.manager.wait_for_task(task.id, None).await.unwrap();

    let restarted = h.manager.restart_task(task.id).await.unwrap();

    assert_eq!(restarted.status, TaskStatus::New);
    assert_eq!(restarted.restart_count, 1);
    assert!(restarted.last_restart_at.is_some());
    assert!(restarted.container_id.is_none());
    assert!(h.backend.container_names().is_empty());

    // A restarted task runs again from the same iteration.
    let started = h.manager.start_task(task.id).await.unwrap();
    assert_eq!(started.status, TaskStatus::InProgress);
    assert_eq!(started.iterations, 1);
}

#[tokio::test]
async fn test_restart_rejected_for_completed_task() {
    let h = harness();
    let task = completed_task(&h, "Done").await;

    let err = h.manager.restart_task(task.id).await.unwrap_err();

    assert!(matches!(err, TaskError::Store(StoreError::Transition(_))));
    let reloaded = h.manager.show_task(task.id).unwrap().task;
    assert_eq!(reloaded.status, TaskStatus::Completed);
    assert_eq!(reloaded.restart_count, 0);
}

#[tokio::test]
async fn test_iterate_carries_previous_artifacts() {
    let h = harness_with(
        MockBackend::new(),
        FakeVcs::new(),
        ScriptedAssistant::new().with_summary("Add tests", "Cover the parser edge cases."),
    );
    let task = completed_task(&h, "Parser").await;
    let first_dir = h.manager.iterations(task.id).iteration_dir(1);
    std::fs::write(first_dir.join("plan.md"), "1. parse\n2. test").unwrap();
    std::fs::write(first_dir.join("changes.md"), "parser.rs").unwrap();

    let task = h
        .manager
        .iterate_task(task.id, "add more tests")
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Iterating);
    assert_eq!(task.iterations, 2);
    let iteration = h.manager.iterations(task.id).load(2).unwrap();
    assert_eq!(iteration.title, "Add tests");
    let context = iteration.previous_context.unwrap();
    assert_eq!(context.iteration_number, 1);
    assert_eq!(context.plan.as_deref(), Some("1. parse\n2. test"));
    assert_eq!(context.changes.as_deref(), Some("parser.rs"));

    let details = h.manager.show_task(task.id).unwrap();
    let numbers: Vec<u32> = details.iterations.iter().map(|i| i.iteration.iteration).collect();
    assert_eq!(numbers, vec![1, 2]);
}

#[tokio::test]
async fn test_iterate_with_unknown_workflow_changes_nothing() {
    let h = harness();
    let task = completed_task(&h, "Parser").await;
    detach_workflow(&h, task.id);
    let calls_before = h.backend.calls().len();

    let err = h.manager.iterate_task(task.id, "more").await.unwrap_err();

    assert!(matches!(err, TaskError::Config(_)));
    assert_eq!(h.backend.calls().len(), calls_before);
    let reloaded = h.manager.show_task(task.id).unwrap().task;
    assert_eq!(reloaded.status, TaskStatus::Completed);
    assert_eq!(reloaded.iterations, 1);
    assert!(h.manager.iterations(task.id).load(2).is_err());
}

#[tokio::test]
async fn test_iterate_sandbox_failure_resets_task_to_new() {
    for op in [SandboxOp::Create, SandboxOp::Start] {
        let h = harness();
        let task = completed_task(&h, "Parser").await;
        h.backend.inject_failure(op);

        let err = h.manager.iterate_task(task.id, "more").await.unwrap_err();

        assert!(matches!(err, TaskError::Sandbox { .. }), "{op:?}: {err:?}");
        assert_eq!(err.kind(), ErrorKind::Environment);
        assert!(h.backend.container_names().is_empty(), "{op:?}");

        let reloaded = h.manager.show_task(task.id).unwrap().task;
        assert_eq!(reloaded.status, TaskStatus::New, "{op:?}");
        assert_eq!(reloaded.iterations, 2);
        assert!(reloaded.container_id.is_none());
        assert_eq!(reloaded.execution_status, ExecutionStatus::Pending);

        let status = h.manager.iterations(task.id).read_status(2).unwrap();
        assert_eq!(status.status, IterationState::Failed, "{op:?}");
        assert!(status.error.is_some());
    }
}

#[tokio::test]
async fn test_wait_timeout_stops_sandbox_and_fails_task() {
    let h = harness_with(
        MockBackend::new().with_wait_delay(Duration::from_secs(30)),
        FakeVcs::new(),
        ScriptedAssistant::new(),
    );
    let task = h
        .manager
        .create_task(CreateTaskRequest::new("x").with_title("X"))
        .await
        .unwrap();
    h.manager.start_task(task.id).await.unwrap();

    let task = h
        .manager
        .wait_for_task(task.id, Some(Duration::from_millis(50)))
        .await
        .unwrap();

    assert!(h.backend.calls().iter().any(|c| c.starts_with("stop:")));
    assert!(!h.backend.container("taskforge-task-1").unwrap().running);
    assert_eq!(task.execution_status, ExecutionStatus::Stopped);
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.failed_at.is_some());

    let status = h.manager.iterations(task.id).read_status(1).unwrap();
    assert_eq!(status.status, IterationState::Failed);
    assert_eq!(status.error.as_deref(), Some("sandbox timed out"));

    let stored = h.manager.show_task(task.id).unwrap().task;
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.execution_status, ExecutionStatus::Stopped);
}

#[tokio::test]
async fn test_iterate_rejected_while_running() {
    let h = harness();
    let task = h
        .manager
        .create_task(CreateTaskRequest::new("x").with_title("X"))
        .await
        .unwrap();
    h.manager.start_task(task.id).await.unwrap();

    let err = h.manager.iterate_task(task.id, "more").await.unwrap_err();

    assert!(matches!(err, TaskError::Store(StoreError::Transition(_))));
    assert!(h.manager.iterations(task.id).load(2).is_err());
}

#[tokio::test]
async fn test_logs_require_a_sandbox() {
    let h = harness();
    let task = h
        .manager
        .create_task(CreateTaskRequest::new("x").with_title("X"))
        .await
        .unwrap();

    let err = h.manager.task_logs(task.id).await.unwrap_err();

    assert!(matches!(err, TaskError::NoSandbox { task_id: 1 }));
}

#[tokio::test]
async fn test_logs_of_running_task() {
    let h = harness_with(
        MockBackend::new().with_logs(["step plan started", "step plan done"]),
        FakeVcs::new(),
        ScriptedAssistant::new(),
    );
    let task = h
        .manager
        .create_task(CreateTaskRequest::new("x").with_title("X"))
        .await
        .unwrap();
    h.manager.start_task(task.id).await.unwrap();

    let logs = h.manager.task_logs(task.id).await.unwrap();

    assert_eq!(logs, "step plan started\nstep plan done\n");
}

#[tokio::test]
async fn test_remove_sandbox_of_running_task_fails_it() {
    let h = harness();
    let task = h
        .manager
        .create_task(CreateTaskRequest::new("x").with_title("X"))
        .await
        .unwrap();
    h.manager.start_task(task.id).await.unwrap();

    let task = h.manager.remove_sandbox(task.id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.execution_status, ExecutionStatus::Removed);
    assert!(task.container_id.is_none());
    assert!(h.backend.container_names().is_empty());
}
