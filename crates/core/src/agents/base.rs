//! Base Agent trait and supporting types.

use async_trait::async_trait;
use std::path::PathBuf;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};

/// Stream of events produced by one agent invocation.
pub type AgentStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, AgentError>> + Send>>;

/// Context information passed to agents during execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// The resolved prompt.
    pub instruction: String,

    /// Working directory of the agent (the task's isolated working copy).
    pub project_path: PathBuf,

    /// Model override; `None` lets the tool pick its default.
    pub model: Option<String>,

    /// Extra system prompt appended to the tool's own.
    pub system_prompt: Option<String>,
}

impl ExecutionContext {
    /// Create a new ExecutionContext with the given instruction.
    ///
    /// Defaults:
    /// - project_path: current directory
    /// - model: tool default
    /// - system_prompt: none
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            project_path: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            model: None,
            system_prompt: None,
        }
    }

    /// Set the project path.
    pub fn with_project_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_path = path.into();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    Thought(String),
    ToolCall(String),
    MessageChunk(String),
    Completed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent not available: {0}")]
    NotAvailable(String),
    #[error("API call failed: {0}")]
    ApiError(String),
    #[error("Stream parsing error: {0}")]
    StreamParseError(String),
    #[error("Execution failed: {0}")]
    ExecutionError(String),
}

#[async_trait]
pub trait Agent: Send + Sync {
    async fn check_availability(&self) -> bool;
    async fn execute(&self, context: &ExecutionContext) -> Result<AgentStream, AgentError>;
}

/// Drain a stream and return the concatenated message chunks.
///
/// Stops at [`AgentEvent::Completed`]; the first error aborts.
pub async fn collect_response(mut stream: AgentStream) -> Result<String, AgentError> {
    let mut message = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            AgentEvent::MessageChunk(chunk) => message.push_str(&chunk),
            AgentEvent::Completed => break,
            AgentEvent::Thought(_) | AgentEvent::ToolCall(_) => {}
        }
    }
    Ok(message)
}
