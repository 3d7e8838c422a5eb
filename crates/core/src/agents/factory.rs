//! Agent factory for creating agent instances from a tool name.

use crate::agents::adapters::{ClaudeAdapter, MockAgent};
use crate::agents::agent_type::AgentType;
use crate::agents::base::Agent;
use anyhow::{bail, Result};
use std::sync::Arc;

/// Factory for creating agent instances based on configuration.
pub struct AgentFactory;

impl AgentFactory {
    /// Create an agent for `tool`, with an optional default model.
    ///
    /// - `claude` → [`ClaudeAdapter`]
    /// - `mock` → [`MockAgent::success`]; `mock-fail` → [`MockAgent::failing`];
    ///   `mock-unavailable` → [`MockAgent::unavailable`]
    ///
    /// # Examples
    ///
    /// ```
    /// use tf_core::agents::AgentFactory;
    ///
    /// let _agent = AgentFactory::create("claude", None).unwrap();
    /// assert!(AgentFactory::create("unknown-tool", None).is_err());
    /// ```
    pub fn create(tool: &str, model: Option<String>) -> Result<Arc<dyn Agent>> {
        let Some(agent_type) = AgentType::from_tool_name(tool) else {
            bail!("Unknown agent tool '{tool}'");
        };

        match agent_type {
            AgentType::Claude => Ok(Arc::new(ClaudeAdapter::new(model))),
            AgentType::Mock => Ok(match tool {
                "mock-fail" | "mock-failure" => Arc::new(MockAgent::failing()),
                "mock-unavailable" => Arc::new(MockAgent::unavailable()),
                _ => Arc::new(MockAgent::success()),
            }),
            AgentType::Codex | AgentType::Gemini => {
                bail!(
                    "Agent tool '{tool}' ({}) is recognised for sandbox credentials but has no adapter",
                    agent_type.name()
                )
            }
        }
    }
}
