//! AI-assisted text services used around the task lifecycle.
//!
//! Every call is fallible. The `*_or_fallback` helpers apply the
//! deterministic local fallback (raw text, task title) and log the failure
//! at `warn` so degradation stays visible.

use crate::agents::base::{collect_response, Agent, AgentError, ExecutionContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tf_protocol::iteration_models::PreviousContext;
use tracing::warn;

const TITLE_LIMIT: usize = 72;

/// A task title plus its expanded description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub title: String,
    pub description: String,
}

impl TaskSummary {
    /// Derive a summary from raw text: the first line becomes the title.
    pub fn from_raw(text: &str) -> Self {
        let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
        let title = if first_line.chars().count() > TITLE_LIMIT {
            let cut: String = first_line.chars().take(TITLE_LIMIT - 3).collect();
            format!("{}...", cut.trim_end())
        } else {
            first_line.to_string()
        };
        Self {
            title,
            description: text.trim().to_string(),
        }
    }
}

#[async_trait]
pub trait Assistant: Send + Sync {
    async fn expand_task(&self, description: &str) -> Result<TaskSummary, AgentError>;

    async fn expand_iteration_instructions(
        &self,
        instructions: &str,
        prior_plan: Option<&str>,
        prior_changes: Option<&str>,
    ) -> Result<TaskSummary, AgentError>;

    /// Produce the full resolved content of a conflicted file.
    async fn resolve_merge_conflict(
        &self,
        file: &Path,
        history: &str,
        conflicted: &str,
    ) -> Result<String, AgentError>;

    async fn generate_commit_message(
        &self,
        title: &str,
        description: &str,
        recent_commits: &[String],
        summaries: &[String],
    ) -> Result<String, AgentError>;
}

/// [`Assistant`] backed by a single-shot [`Agent`] call.
pub struct AgentAssistant {
    agent: Arc<dyn Agent>,
    project_path: PathBuf,
    model: Option<String>,
}

impl AgentAssistant {
    pub fn new(agent: Arc<dyn Agent>, project_path: impl Into<PathBuf>) -> Self {
        Self {
            agent,
            project_path: project_path.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    async fn ask(&self, prompt: String) -> Result<String, AgentError> {
        let context = ExecutionContext::new(prompt)
            .with_project_path(self.project_path.clone())
            .with_model(self.model.clone());
        let stream = self.agent.execute(&context).await?;
        let reply = collect_response(stream).await?;
        if reply.trim().is_empty() {
            return Err(AgentError::ExecutionError("Agent returned an empty reply".to_string()));
        }
        Ok(reply)
    }
}

#[async_trait]
impl Assistant for AgentAssistant {
    async fn expand_task(&self, description: &str) -> Result<TaskSummary, AgentError> {
        let prompt = format!(
            "Turn the following request into a task for a coding agent.\n\
             Reply with JSON only: {{\"title\": \"<at most {TITLE_LIMIT} chars>\", \
             \"description\": \"<detailed, actionable description>\"}}\n\n\
             Request:\n{description}"
        );
        parse_summary(&self.ask(prompt).await?)
    }

    async fn expand_iteration_instructions(
        &self,
        instructions: &str,
        prior_plan: Option<&str>,
        prior_changes: Option<&str>,
    ) -> Result<TaskSummary, AgentError> {
        let mut prompt = format!(
            "A coding agent already worked on this task. Turn the follow-up \
             instructions into the next iteration's task.\n\
             Reply with JSON only: {{\"title\": \"...\", \"description\": \"...\"}}\n\n\
             Instructions:\n{instructions}\n"
        );
        if let Some(plan) = prior_plan {
            prompt.push_str(&format!("\nPrevious plan:\n{plan}\n"));
        }
        if let Some(changes) = prior_changes {
            prompt.push_str(&format!("\nPrevious changes:\n{changes}\n"));
        }
        parse_summary(&self.ask(prompt).await?)
    }

    async fn resolve_merge_conflict(
        &self,
        file: &Path,
        history: &str,
        conflicted: &str,
    ) -> Result<String, AgentError> {
        let prompt = format!(
            "Resolve the git merge conflict in `{}`.\n\
             Reply with the complete resolved file content only, without \
             conflict markers or commentary.\n\n\
             Recent history of the file:\n{history}\n\n\
             Conflicted content:\n{conflicted}",
            file.display()
        );
        let resolved = strip_code_fence(&self.ask(prompt).await?);
        if has_conflict_markers(&resolved) {
            return Err(AgentError::ExecutionError(format!(
                "Resolution for {} still contains conflict markers",
                file.display()
            )));
        }
        Ok(resolved)
    }

    async fn generate_commit_message(
        &self,
        title: &str,
        description: &str,
        recent_commits: &[String],
        summaries: &[String],
    ) -> Result<String, AgentError> {
        let prompt = format!(
            "Write a git commit message for the work below. Match the style \
             of the recent commits. Reply with the message only.\n\n\
             Task: {title}\n{description}\n\n\
             Recent commits:\n{}\n\n\
             Iteration summaries:\n{}",
            recent_commits.join("\n"),
            summaries.join("\n---\n")
        );
        let message = strip_code_fence(&self.ask(prompt).await?);
        Ok(message.trim().to_string())
    }
}

/// Expand a new task description, falling back to the raw text.
pub async fn expand_task_or_fallback(assistant: &dyn Assistant, description: &str) -> TaskSummary {
    match assistant.expand_task(description).await {
        Ok(summary) if !summary.title.trim().is_empty() => summary,
        Ok(_) => {
            warn!("Task expansion returned an empty title, using raw description");
            TaskSummary::from_raw(description)
        }
        Err(e) => {
            warn!(error = %e, "Task expansion failed, using raw description");
            TaskSummary::from_raw(description)
        }
    }
}

/// Expand iteration instructions, falling back to the raw instructions.
pub async fn expand_iteration_or_fallback(
    assistant: &dyn Assistant,
    instructions: &str,
    previous: Option<&PreviousContext>,
) -> TaskSummary {
    let plan = previous.and_then(|c| c.plan.as_deref());
    let changes = previous.and_then(|c| c.changes.as_deref());
    match assistant
        .expand_iteration_instructions(instructions, plan, changes)
        .await
    {
        Ok(summary) if !summary.title.trim().is_empty() => summary,
        Ok(_) => {
            warn!("Iteration expansion returned an empty title, using raw instructions");
            TaskSummary::from_raw(instructions)
        }
        Err(e) => {
            warn!(error = %e, "Iteration expansion failed, using raw instructions");
            TaskSummary::from_raw(instructions)
        }
    }
}

/// Generate a commit message, falling back to the task title.
pub async fn commit_message_or_fallback(
    assistant: &dyn Assistant,
    title: &str,
    description: &str,
    recent_commits: &[String],
    summaries: &[String],
) -> String {
    match assistant
        .generate_commit_message(title, description, recent_commits, summaries)
        .await
    {
        Ok(message) if !message.trim().is_empty() => message,
        Ok(_) => {
            warn!("Commit message generation returned nothing, using task title");
            title.to_string()
        }
        Err(e) => {
            warn!(error = %e, "Commit message generation failed, using task title");
            title.to_string()
        }
    }
}

/// True if `text` still contains git conflict markers.
pub fn has_conflict_markers(text: &str) -> bool {
    text.lines().any(|line| {
        line.starts_with("<<<<<<< ") || line == "=======" || line.starts_with(">>>>>>> ")
    })
}

fn parse_summary(reply: &str) -> Result<TaskSummary, AgentError> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => {
            return Err(AgentError::StreamParseError(
                "Reply does not contain a JSON object".to_string(),
            ))
        }
    };
    let summary: TaskSummary = serde_json::from_str(json)
        .map_err(|e| AgentError::StreamParseError(format!("Invalid task summary: {e}")))?;
    Ok(TaskSummary {
        title: summary.title.trim().to_string(),
        description: summary.description.trim().to_string(),
    })
}

/// Remove a surrounding Markdown code fence, if any.
fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return text.to_string();
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text.to_string();
    };
    // Drop the language tag line.
    match body.split_once('\n') {
        Some((_, content)) => content.to_string(),
        None => String::new(),
    }
}
