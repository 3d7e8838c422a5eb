//! # tf-protocol
//!
//! Record and definition types shared by the taskforge engine and CLI.
//!
//! This crate defines all persisted and declarative data structures:
//! - Task records (`task.json`)
//! - Iteration records and their status companions
//! - Workflow definitions (`.taskforge/workflows/*.yaml`)
//! - Global configuration (`.taskforge/config.toml`)
//! - Run events streamed from the workflow engine
//!
//! ## Modules
//!
//! - [`task_models`]: Task record, lifecycle status, sandbox execution status
//! - [`iteration_models`]: Iteration record, previous context, iteration status
//! - [`workflow_models`]: Workflow, inputs, outputs and steps
//! - [`config_models`]: Global configuration from config.toml
//! - [`events`]: Events emitted while a workflow runs
//!
//! ## Design Principles
//!
//! - Minimal dependencies: serde, chrono and uuid
//! - No dependencies on other taskforge crates

pub mod config_models;
pub mod events;
pub mod iteration_models;
pub mod task_models;
pub mod workflow_models;

pub use config_models::*;
pub use events::*;
pub use iteration_models::*;
pub use task_models::*;
pub use workflow_models::*;
