//! Claude adapter implementation using the Claude CLI subprocess.

use crate::agents::base::{Agent, AgentError, AgentEvent, AgentStream, ExecutionContext};
use crate::agents::cli_executor::CliExecutor;
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;
use tokio_stream::StreamExt;

/// Claude adapter for executing instructions using the Claude CLI.
///
/// Runs `claude -p <prompt> --output-format stream-json` and converts its
/// JSON Lines output into [`AgentEvent`]s.
pub struct ClaudeAdapter {
    binary: String,
    default_model: Option<String>,
}

impl ClaudeAdapter {
    pub fn new(default_model: Option<String>) -> Self {
        Self {
            binary: "claude".to_string(),
            default_model,
        }
    }

    /// Use a different executable, e.g. a wrapper script.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn build_args(&self, context: &ExecutionContext) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            context.instruction.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--permission-mode".to_string(),
            "bypassPermissions".to_string(),
        ];
        if let Some(model) = context.model.as_ref().or(self.default_model.as_ref()) {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(prompt) = &context.system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(prompt.clone());
        }
        args
    }
}

#[async_trait]
impl Agent for ClaudeAdapter {
    async fn check_availability(&self) -> bool {
        match Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    async fn execute(&self, context: &ExecutionContext) -> Result<AgentStream, AgentError> {
        let mut values = CliExecutor::execute(
            self.binary.clone(),
            self.build_args(context),
            context.project_path.clone(),
        );

        let stream = async_stream::stream! {
            while let Some(value) = values.next().await {
                let value = match value {
                    Ok(value) => value,
                    Err(e) => {
                        yield Err(e);
                        continue;
                    }
                };
                match serde_json::from_value::<ClaudeMessage>(value) {
                    Ok(msg) => {
                        for event in convert_claude_message(msg) {
                            yield event;
                        }
                    }
                    // Unknown message types (rate limit notices etc.) are skipped.
                    Err(_) => continue,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Claude CLI message types (stream-json output).
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClaudeMessage {
    #[serde(rename = "system")]
    System {},
    #[serde(rename = "assistant")]
    Assistant { message: MessageBody },
    #[serde(rename = "user")]
    User {},
    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

/// Content blocks within an assistant message.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

fn convert_claude_message(msg: ClaudeMessage) -> Vec<Result<AgentEvent, AgentError>> {
    match msg {
        ClaudeMessage::System {} | ClaudeMessage::User {} => Vec::new(),
        ClaudeMessage::Assistant { message } => message
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } if !text.trim().is_empty() => {
                    Some(Ok(AgentEvent::MessageChunk(text)))
                }
                ContentBlock::Thinking { thinking } => Some(Ok(AgentEvent::Thought(thinking))),
                ContentBlock::ToolUse { name, input } => {
                    let call = serde_json::json!({ "name": name, "input": input });
                    Some(Ok(AgentEvent::ToolCall(call.to_string())))
                }
                ContentBlock::Text { .. } | ContentBlock::Other => None,
            })
            .collect(),
        ClaudeMessage::Result { is_error: true, result } => vec![Err(AgentError::ApiError(
            result.unwrap_or_else(|| "Claude reported an error".to_string()),
        ))],
        ClaudeMessage::Result { .. } => vec![Ok(AgentEvent::Completed)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Vec<Result<AgentEvent, AgentError>> {
        let msg: ClaudeMessage = serde_json::from_str(line).unwrap();
        convert_claude_message(msg)
    }

    #[test]
    fn test_build_args_prefers_context_model() {
        let adapter = ClaudeAdapter::new(Some("sonnet".to_string()));
        let context = ExecutionContext::new("fix bug").with_model(Some("opus".to_string()));

        let args = adapter.build_args(&context);

        assert_eq!(args[0], "-p");
        assert_eq!(args[1], "fix bug");
        assert!(args.windows(2).any(|w| w == ["--output-format", "stream-json"]));
        assert!(args.windows(2).any(|w| w == ["--model", "opus"]));
    }

    #[test]
    fn test_build_args_without_model() {
        let adapter = ClaudeAdapter::new(None);
        let args = adapter.build_args(&ExecutionContext::new("x"));
        assert!(!args.contains(&"--model".to_string()));
    }

    #[test]
    fn test_convert_assistant_blocks() {
        let events = parse(
            r#"{"type":"assistant","message":{"content":[
                {"type":"text","text":"Planning"},
                {"type":"tool_use","id":"1","name":"Edit","input":{"file":"a.rs"}},
                {"type":"text","text":"  "}
            ]}}"#,
        );

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Ok(AgentEvent::MessageChunk("Planning".to_string())));
        assert!(matches!(&events[1], Ok(AgentEvent::ToolCall(call)) if call.contains("Edit")));
    }

    #[test]
    fn test_convert_result() {
        assert_eq!(
            parse(r#"{"type":"result","subtype":"success","is_error":false,"result":"done"}"#),
            vec![Ok(AgentEvent::Completed)]
        );
        assert!(matches!(
            parse(r#"{"type":"result","is_error":true,"result":"overloaded"}"#)[0],
            Err(AgentError::ApiError(_))
        ));
    }

    #[test]
    fn test_system_messages_are_silent() {
        assert!(parse(r#"{"type":"system","subtype":"init","session_id":"abc"}"#).is_empty());
    }

    #[tokio::test]
    async fn test_check_availability_missing_binary() {
        let adapter = ClaudeAdapter::new(None).with_binary("nonexistent-claude-xyz");
        assert!(!adapter.check_availability().await);
    }
}
