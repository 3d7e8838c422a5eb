//! Agent manager for orchestrating multiple agents.
//!
//! The `AgentManager` is responsible for:
//! - Registering agents by tool name
//! - Looking up agents by name
//! - Providing fallback logic when agents are unavailable

use crate::agents::base::{Agent, AgentError, AgentStream, ExecutionContext};
use crate::agents::factory::AgentFactory;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Registry of agent adapters keyed by tool name.
#[derive(Clone, Default)]
pub struct AgentManager {
    agents: HashMap<String, Arc<dyn Agent>>,
    fallback_agent_name: Option<String>,
}

impl AgentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry holding one agent per tool in `tools`.
    ///
    /// Tools the factory cannot build are skipped with a warning; executing
    /// them later reports `NotAvailable`.
    pub fn from_tools<'a>(tools: impl IntoIterator<Item = &'a str>, model: Option<String>) -> Self {
        let mut manager = Self::new();
        for tool in tools {
            if manager.has_agent(tool) {
                continue;
            }
            match AgentFactory::create(tool, model.clone()) {
                Ok(agent) => manager.register(tool, agent),
                Err(e) => warn!(tool, error = %e, "Skipping agent tool"),
            }
        }
        manager
    }

    /// Register (or replace) the agent for `name`.
    pub fn register(&mut self, name: impl Into<String>, agent: Arc<dyn Agent>) {
        self.agents.insert(name.into(), agent);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_agent(mut self, name: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        self.register(name, agent);
        self
    }

    /// Set the fallback agent to use when the requested agent is unavailable.
    pub fn with_fallback(mut self, agent_name: impl Into<String>) -> Self {
        self.fallback_agent_name = Some(agent_name.into());
        self
    }

    pub fn get_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    /// Execute an instruction with the specified agent.
    ///
    /// 1. Look up the requested agent
    /// 2. Check if it's available
    /// 3. If unavailable and a fallback is configured, try the fallback
    pub async fn execute(
        &self,
        agent_name: &str,
        context: &ExecutionContext,
    ) -> Result<AgentStream, AgentError> {
        let Some(agent) = self.get_agent(agent_name) else {
            return Err(AgentError::NotAvailable(format!(
                "Agent '{agent_name}' not found in registry"
            )));
        };

        if agent.check_availability().await {
            return agent.execute(context).await;
        }

        if let Some(fallback_name) = self.fallback_agent_name.as_deref() {
            if fallback_name != agent_name {
                if let Some(fallback) = self.get_agent(fallback_name) {
                    if fallback.check_availability().await {
                        warn!(agent_name, fallback_name, "Agent unavailable, using fallback");
                        return fallback.execute(context).await;
                    }
                }
            }
        }

        debug!(agent_name, "Agent unavailable");
        Err(AgentError::NotAvailable(format!(
            "Agent '{agent_name}' is not available and no fallback succeeded"
        )))
    }

    /// List all registered agent names, sorted.
    pub fn list_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_agent(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }
}
