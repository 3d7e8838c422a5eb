//! Agent abstraction and management.
//!
//! This module provides the `Agent` trait (Adapter Pattern), the
//! `AgentManager` registry, and the [`Assistant`] text services built on
//! top of an agent.

pub mod adapters;
pub mod agent_type;
pub mod assistant;
pub mod base;
pub mod cli_executor;
pub mod factory;
pub mod manager;

pub use adapters::{ClaudeAdapter, MockAgent};
pub use agent_type::AgentType;
pub use assistant::{
    commit_message_or_fallback, expand_iteration_or_fallback, expand_task_or_fallback,
    AgentAssistant, Assistant, TaskSummary,
};
pub use base::{collect_response, Agent, AgentError, AgentEvent, AgentStream, ExecutionContext};
pub use factory::AgentFactory;
pub use manager::AgentManager;
