//! `GitCli` against a real repository. Requires `git` on PATH.

#![cfg(feature = "e2e-cli-tests")]

use std::path::Path;
use std::process::Command;
use tf_core::git::{task_branch, GitCli, MergeStatus, Vcs};

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed");
}

fn init_repo(dir: &Path) {
    git(dir, &["init", "-q", "-b", "main"]);
    git(dir, &["config", "user.name", "Test"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    std::fs::write(dir.join("README.md"), "hello\n").unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", "Initial commit"]);
}

#[tokio::test]
async fn test_worktree_commit_and_clean_merge() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path());
    let vcs = GitCli::new(repo.path());
    let worktree = repo.path().join(".taskforge/worktrees/task-1");
    let branch = task_branch(1);

    assert_eq!(vcs.current_branch().await.unwrap(), "main");
    vcs.create_worktree(&worktree, &branch, "main").await.unwrap();
    assert!(vcs.worktree_exists(&worktree).await.unwrap());
    assert!(vcs.branch_exists(&branch).await.unwrap());

    std::fs::write(worktree.join("feature.txt"), "new\n").unwrap();
    assert!(vcs.has_uncommitted_changes(&worktree).await.unwrap());
    assert!(vcs.commit_all(&worktree, "Add feature").await.unwrap());
    assert!(!vcs.has_uncommitted_changes(&worktree).await.unwrap());

    // Runtime state under .taskforge/ does not make the target dirty.
    assert!(!vcs.has_uncommitted_changes(repo.path()).await.unwrap());
    let status = vcs.merge(&branch, "Merge task 1").await.unwrap();
    assert_eq!(status, MergeStatus::Clean);
    assert!(repo.path().join("feature.txt").is_file());

    vcs.remove_worktree(&worktree).await.unwrap();
    assert!(!vcs.worktree_exists(&worktree).await.unwrap());
}

#[tokio::test]
async fn test_conflicting_merge_lists_files_and_aborts() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path());
    let vcs = GitCli::new(repo.path());
    let worktree = repo.path().join(".taskforge/worktrees/task-2");
    let branch = task_branch(2);
    vcs.create_worktree(&worktree, &branch, "main").await.unwrap();

    std::fs::write(worktree.join("README.md"), "from task\n").unwrap();
    vcs.commit_all(&worktree, "Task edit").await.unwrap();
    std::fs::write(repo.path().join("README.md"), "from main\n").unwrap();
    git(repo.path(), &["commit", "-q", "-am", "Main edit"]);

    let status = vcs.merge(&branch, "Merge task 2").await.unwrap();
    assert_eq!(status, MergeStatus::Conflicted(vec!["README.md".to_string()]));
    assert_eq!(vcs.conflicted_files().await.unwrap(), vec!["README.md"]);

    vcs.abort_merge().await.unwrap();
    let content = std::fs::read_to_string(repo.path().join("README.md")).unwrap();
    assert_eq!(content, "from main\n");
}
