//! The LLM treated as a pluggable planning function.
//!
//! The orchestrator never talks to [`arawn_llm::LlmBackend`] directly. It
//! talks to an [`Oracle`], which owns the prompt-construction and
//! response-parsing glue around a backend. This keeps the mode state
//! machines (`mode.rs`) free of any vendor-specific request/response shape.

use std::pin::Pin;
use std::sync::Arc;

use arawn_llm::{CompletionRequest, LlmBackend, Message, MockBackend, ToolDefinition};
use arawn_session::ContextBuffer;
use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestratorError, Result};
use crate::types::ToolCallRequest;

/// What the model decided to do with one planning step.
#[derive(Debug, Clone)]
pub enum Turn {
    /// A final textual answer; no further tool calls requested.
    Text(String),
    /// One or more tool calls the orchestrator should dispatch.
    ToolCalls(Vec<ToolCallRequest>),
    /// Trailing prose alongside tool calls issued in the same turn.
    Mixed {
        text: String,
        tool_calls: Vec<ToolCallRequest>,
    },
}

impl Turn {
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Turn::Text(_) => &[],
            Turn::ToolCalls(calls) => calls,
            Turn::Mixed { tool_calls, .. } => tool_calls,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Turn::Text(text) | Turn::Mixed { text, .. } => Some(text),
            Turn::ToolCalls(_) => None,
        }
    }
}

/// Incremental chunk emitted while the oracle streams a plan.
#[derive(Debug, Clone)]
pub enum PlanChunk {
    TextDelta(String),
    Done(Turn),
}

pub type PlanStream = Pin<Box<dyn Stream<Item = Result<PlanChunk>> + Send>>;

/// The model consumed as a pluggable planning function.
///
/// Implementations own prompt construction (system prompt + buffer +
/// allowed-tool list -> a concrete backend request) and response parsing
/// (backend response -> [`Turn`]). Both operations must honor cancellation
/// promptly: a cancelled plan must not leave the caller waiting.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn plan(
        &self,
        system_prompt: &str,
        buffer: &ContextBuffer,
        allowed_tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<Turn>;

    async fn stream_plan(
        &self,
        system_prompt: &str,
        buffer: &ContextBuffer,
        allowed_tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<PlanStream>;
}

/// Renders a [`ContextBuffer`] into the backend's `Message` wire shape.
fn buffer_to_messages(buffer: &ContextBuffer) -> Vec<Message> {
    buffer
        .turns()
        .filter(|turn| turn.role != arawn_session::Role::System)
        .map(|turn| match turn.role {
            arawn_session::Role::User => Message::user(turn.content.clone()),
            _ => Message::assistant(turn.content.clone()),
        })
        .collect()
}

fn system_prompt_with_pinned_turns(system_prompt: &str, buffer: &ContextBuffer) -> String {
    let pinned: Vec<&str> = buffer
        .turns()
        .filter(|turn| turn.role == arawn_session::Role::System)
        .map(|turn| turn.content.as_str())
        .collect();
    if pinned.is_empty() {
        system_prompt.to_string()
    } else {
        format!("{}\n\n{}", system_prompt, pinned.join("\n\n"))
    }
}

/// Default [`Oracle`] wrapping any concrete [`LlmBackend`].
pub struct BackendOracle {
    backend: Arc<dyn LlmBackend>,
    max_tokens: u32,
}

impl BackendOracle {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend,
            max_tokens: 4096,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_request(
        &self,
        system_prompt: &str,
        buffer: &ContextBuffer,
        allowed_tools: &[ToolDefinition],
    ) -> CompletionRequest {
        let mut request = CompletionRequest::new(
            self.backend.name().to_string(),
            buffer_to_messages(buffer),
            self.max_tokens,
        )
        .with_system(system_prompt_with_pinned_turns(system_prompt, buffer));

        if !allowed_tools.is_empty() {
            request = request.with_tools(allowed_tools.to_vec());
        }
        request
    }

    fn parse_turn(response: arawn_llm::CompletionResponse) -> Turn {
        let text = response.text();
        let tool_calls: Vec<ToolCallRequest> = response
            .tool_uses()
            .into_iter()
            .map(|tool_use| ToolCallRequest {
                call_id: tool_use.id.clone(),
                tool: tool_use.name.clone(),
                arguments: tool_use.input.clone(),
            })
            .collect();

        match (text.is_empty(), tool_calls.is_empty()) {
            (true, false) => Turn::ToolCalls(tool_calls),
            (false, true) => Turn::Text(text),
            (false, false) => Turn::Mixed { text, tool_calls },
            (true, true) => Turn::Text(String::new()),
        }
    }
}

#[async_trait]
impl Oracle for BackendOracle {
    async fn plan(
        &self,
        system_prompt: &str,
        buffer: &ContextBuffer,
        allowed_tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<Turn> {
        let request = self.build_request(system_prompt, buffer, allowed_tools);

        tokio::select! {
            result = self.backend.complete(request) => {
                Ok(Self::parse_turn(result?))
            }
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
        }
    }

    async fn stream_plan(
        &self,
        system_prompt: &str,
        buffer: &ContextBuffer,
        allowed_tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<PlanStream> {
        use arawn_llm::{ContentDelta, StreamEvent};
        use futures::StreamExt;

        let request = self.build_request(system_prompt, buffer, allowed_tools);
        let cancel = cancel.clone();

        let mut events = tokio::select! {
            stream = self.backend.complete_stream(request) => stream?,
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
        };

        let stream = async_stream::stream! {
            let mut text = String::new();
            loop {
                let next = tokio::select! {
                    event = events.next() => event,
                    _ = cancel.cancelled() => {
                        yield Err(OrchestratorError::Cancelled);
                        return;
                    }
                };

                let Some(event) = next else { return };
                match event {
                    Ok(StreamEvent::ContentBlockDelta { delta: ContentDelta::TextDelta(delta), .. }) => {
                        text.push_str(&delta);
                        yield Ok(PlanChunk::TextDelta(delta));
                    }
                    Ok(StreamEvent::MessageStop) => {
                        yield Ok(PlanChunk::Done(Turn::Text(text.clone())));
                        return;
                    }
                    Ok(StreamEvent::Error { message }) => {
                        yield Err(OrchestratorError::internal(message));
                        return;
                    }
                    Ok(_) => continue,
                    Err(err) => {
                        yield Err(OrchestratorError::Llm(err));
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Deterministic [`Oracle`] test double: a queue of [`Turn`]s returned in
/// order, plus a request log. Grounded in [`MockBackend`]'s queued-response
/// shape but speaks in [`Turn`] rather than raw completions.
pub struct MockOracle {
    turns: std::sync::Mutex<std::collections::VecDeque<Turn>>,
    calls: std::sync::Mutex<Vec<String>>,
}

impl MockOracle {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: std::sync::Mutex::new(turns.into()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![Turn::Text(text.into())])
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Backing [`MockBackend`] with no queued responses, exposed so tests
    /// that need a concrete `LlmBackend` (e.g. to build a [`BackendOracle`])
    /// have something to point at.
    pub fn inert_backend() -> MockBackend {
        MockBackend::new(Vec::new())
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn plan(
        &self,
        system_prompt: &str,
        _buffer: &ContextBuffer,
        _allowed_tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<Turn> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        self.calls.lock().unwrap().push(system_prompt.to_string());
        let mut turns = self.turns.lock().unwrap();
        turns
            .pop_front()
            .ok_or_else(|| OrchestratorError::internal("MockOracle: no more queued turns"))
    }

    async fn stream_plan(
        &self,
        system_prompt: &str,
        buffer: &ContextBuffer,
        allowed_tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<PlanStream> {
        let turn = self.plan(system_prompt, buffer, allowed_tools, cancel).await?;
        let text = turn.text().unwrap_or_default().to_string();
        let chunks = vec![Ok(PlanChunk::TextDelta(text)), Ok(PlanChunk::Done(turn))];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_buffer() -> ContextBuffer {
        ContextBuffer::new(1000)
    }

    #[tokio::test]
    async fn test_mock_oracle_returns_queued_turns_in_order() {
        let oracle = MockOracle::new(vec![Turn::Text("first".into()), Turn::Text("second".into())]);
        let cancel = CancellationToken::new();

        let a = oracle.plan("sys", &empty_buffer(), &[], &cancel).await.unwrap();
        let b = oracle.plan("sys", &empty_buffer(), &[], &cancel).await.unwrap();

        assert!(matches!(a, Turn::Text(t) if t == "first"));
        assert!(matches!(b, Turn::Text(t) if t == "second"));
        assert_eq!(oracle.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_oracle_exhausted_is_internal_error() {
        let oracle = MockOracle::new(vec![]);
        let cancel = CancellationToken::new();
        let result = oracle.plan("sys", &empty_buffer(), &[], &cancel).await;
        assert!(matches!(result, Err(OrchestratorError::Internal(_))));
    }

    #[tokio::test]
    async fn test_mock_oracle_respects_cancellation() {
        let oracle = MockOracle::with_text("unused");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = oracle.plan("sys", &empty_buffer(), &[], &cancel).await;
        assert!(matches!(result, Err(OrchestratorError::Cancelled)));
    }

    #[tokio::test]
    async fn test_backend_oracle_plan_text_response() {
        let backend = Arc::new(MockBackend::with_text("hello from backend"));
        let oracle = BackendOracle::new(backend);
        let cancel = CancellationToken::new();

        let turn = oracle.plan("sys", &empty_buffer(), &[], &cancel).await.unwrap();
        assert!(matches!(turn, Turn::Text(t) if t == "hello from backend"));
    }
}
