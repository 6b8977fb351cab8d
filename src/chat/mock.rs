//! Mock chat model for tests and offline runs.
//!
//! A responder closure decides each turn from the full request, which lets
//! tests script tool calls, react to tool results, or read conversation
//! history. Streaming splits the same generation into fragments, so the
//! streamed text always concatenates to what `complete` returns.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::client::{ChatError, ChatModel, DeltaStream};
use super::types::{ChatMessage, Generation, GenerationDelta, GenerationRequest};

type Responder = Box<dyn Fn(&GenerationRequest) -> Result<Generation, ChatError> + Send + Sync>;

/// Scriptable `ChatModel` that records every request it receives.
pub struct MockChatModel {
    responder: Responder,
    requests: Mutex<Vec<GenerationRequest>>,
    fragment_chars: usize,
}

impl MockChatModel {
    /// Build from a responder closure.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Result<Generation, ChatError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            fragment_chars: 4,
        }
    }

    /// Always answer with the same text and never call tools.
    pub fn with_text(content: impl Into<String>) -> Self {
        let content = content.into();
        Self::new(move |_| Ok(Generation::text(content.clone())))
    }

    /// Answer turn by turn from a fixed script; once exhausted, further turns
    /// fail with a decode error.
    pub fn scripted(turns: Vec<Generation>) -> Self {
        let turns = Mutex::new(VecDeque::from(turns));
        Self::new(move |_| {
            turns
                .lock()
                .map_err(|_| ChatError::Decode("script lock poisoned".to_string()))?
                .pop_front()
                .ok_or_else(|| ChatError::Decode("script exhausted".to_string()))
        })
    }

    /// Echo the last user message back.
    pub fn echo() -> Self {
        Self::new(|request| {
            let last_user = request
                .messages
                .iter()
                .rev()
                .find_map(|m| match m {
                    ChatMessage::User { content } => Some(content.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            Ok(Generation::text(last_user))
        })
    }

    /// Size of the text fragments produced by `stream`.
    pub fn with_fragment_chars(mut self, chars: usize) -> Self {
        self.fragment_chars = chars.max(1);
        self
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of model turns served.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    fn respond(&self, request: GenerationRequest) -> Result<Generation, ChatError> {
        let generation = (self.responder)(&request);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        generation
    }
}

fn split_fragments(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(&self, request: GenerationRequest) -> Result<Generation, ChatError> {
        self.respond(request)
    }

    async fn stream(&self, request: GenerationRequest) -> Result<DeltaStream, ChatError> {
        let generation = self.respond(request)?;

        let mut deltas: Vec<Result<GenerationDelta, ChatError>> = split_fragments(&generation.content, self.fragment_chars)
            .into_iter()
            .map(|f| Ok(GenerationDelta::Text(f)))
            .collect();

        // Split each call's arguments in two to exercise reassembly.
        for (index, call) in generation.tool_calls.into_iter().enumerate() {
            let mid = call
                .arguments
                .char_indices()
                .nth(call.arguments.chars().count() / 2)
                .map(|(i, _)| i)
                .unwrap_or(call.arguments.len());
            let (head, tail) = call.arguments.split_at(mid);
            deltas.push(Ok(GenerationDelta::ToolCall {
                index,
                id: Some(call.id.into_inner()),
                name: Some(call.name.into_inner()),
                arguments: head.to_string(),
            }));
            deltas.push(Ok(GenerationDelta::ToolCall {
                index,
                id: None,
                name: None,
                arguments: tail.to_string(),
            }));
        }

        Ok(Box::pin(futures::stream::iter(deltas)))
    }
}
