//! # tf-core
//!
//! Task orchestration for AI coding agents.
//!
//! A task is a unit of agent work that runs in its own git worktree inside a
//! container sandbox, driven by a declarative workflow. Tasks can be refined
//! through iterations and finally merged back into the source branch.
//!
//! ## Modules
//!
//! - [`config`]: Project configuration and the workflow library
//! - [`init`]: `.taskforge/` project scaffolding
//! - [`state`]: Task records, iterations and the [`TaskManager`](state::TaskManager)
//! - [`workflow`]: Workflow validation, templating and step execution
//! - [`sandbox`]: Container runtimes and sandbox lifecycle
//! - [`agents`]: Agent adapters and the assistant used for expansion and merges
//! - [`git`]: Worktrees, branches and merges
//! - [`merge`]: Conflict-assisted merging of task branches

pub mod agents;
pub mod config;
pub mod error;
pub mod git;
pub mod init;
pub mod merge;
pub mod sandbox;
pub mod state;
pub mod workflow;

pub use error::{ErrorKind, TaskError, TaskResult};
