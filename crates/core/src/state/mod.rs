//! Durable state for tasks and iterations.
//!
//! This module provides:
//! - The task state machine ([`TaskRecord`])
//! - The on-disk task store and id counter
//! - Iteration records, context chaining and status tracking
//! - The [`TaskManager`] that coordinates whole task lifecycles

pub mod counter;
pub mod error;
pub mod files;
pub mod iteration;
pub mod manager;
pub mod status;
pub mod store;
pub mod task;

pub use counter::IdCounter;
pub use error::{StoreError, StoreResult, TransitionError};
pub use iteration::IterationManager;
pub use manager::TaskManager;
pub use status::IterationStatusTracker;
pub use store::TaskStore;
pub use task::TaskRecord;
