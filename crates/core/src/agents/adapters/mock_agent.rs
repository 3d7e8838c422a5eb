//! Mock agent implementation for testing.

use crate::agents::base::{Agent, AgentError, AgentEvent, AgentStream, ExecutionContext};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scriptable in-process agent.
///
/// Replies queued with [`MockAgent::with_replies`] are consumed one per
/// execution; once exhausted the fixed event list is replayed. Every
/// instruction received is recorded.
#[derive(Clone)]
pub struct MockAgent {
    available: bool,
    events: Vec<Result<AgentEvent, AgentError>>,
    replies: Arc<Mutex<VecDeque<Result<String, AgentError>>>>,
    received: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
}

impl MockAgent {
    pub fn new(available: bool, events: Vec<Result<AgentEvent, AgentError>>) -> Self {
        Self {
            available,
            events,
            replies: Arc::new(Mutex::new(VecDeque::new())),
            received: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    pub fn success() -> Self {
        Self::new(
            true,
            vec![
                Ok(AgentEvent::Thought("Mock agent thinking".to_string())),
                Ok(AgentEvent::MessageChunk("Mock response".to_string())),
                Ok(AgentEvent::Completed),
            ],
        )
    }

    pub fn unavailable() -> Self {
        Self::new(false, vec![])
    }

    pub fn failing() -> Self {
        Self::new(
            true,
            vec![
                Ok(AgentEvent::Thought("Starting...".to_string())),
                Err(AgentError::ExecutionError("Mock failure".to_string())),
            ],
        )
    }

    /// Queue replies returned by successive executions.
    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = Result<S, AgentError>>,
        S: Into<String>,
    {
        if let Ok(mut queue) = self.replies.lock() {
            queue.extend(replies.into_iter().map(|r| r.map(Into::into)));
        }
        self
    }

    /// Sleep before emitting any event.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Instructions received so far, oldest first.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_events(&self) -> Vec<Result<AgentEvent, AgentError>> {
        let reply = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        match reply {
            Some(Ok(text)) => vec![Ok(AgentEvent::MessageChunk(text)), Ok(AgentEvent::Completed)],
            Some(Err(e)) => vec![Err(e)],
            None => self.events.clone(),
        }
    }
}

#[async_trait]
impl Agent for MockAgent {
    async fn check_availability(&self) -> bool {
        self.available
    }

    async fn execute(&self, context: &ExecutionContext) -> Result<AgentStream, AgentError> {
        if !self.available {
            return Err(AgentError::NotAvailable("Mock agent not available".to_string()));
        }
        if let Ok(mut received) = self.received.lock() {
            received.push(context.instruction.clone());
        }

        let events = self.next_events();
        let delay = self.delay;
        let stream = async_stream::stream! {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            for event in events {
                yield event;
            }
        };
        Ok(Box::pin(stream))
    }
}
