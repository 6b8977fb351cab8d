//! Chat-completions client for OpenAI-compatible providers.
//!
//! DashScope exposes Qwen models through an OpenAI-compatible endpoint, so the
//! default base URL points there. Any provider speaking the same protocol
//! (tool calls, `stream: true` server-sent events) works.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::client::{ChatError, ChatModel, DeltaStream};
use super::types::{ChatMessage, Generation, GenerationDelta, GenerationRequest, ToolCall, ToolDescriptor};
use crate::types::{ToolCallId, ToolName};

/// DashScope OpenAI-compatible endpoint.
pub const DASHSCOPE_COMPATIBLE_BASE: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Connection settings for an OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Upper bound for a non-streaming completion.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Longest wait for the next event of a streamed completion.
    pub stream_idle_timeout: Duration,
}

impl Default for OpenAiCompatibleConfig {
    fn default() -> Self {
        Self {
            base_url: DASHSCOPE_COMPATIBLE_BASE.to_string(),
            api_key: String::new(),
            model: "qwen-plus".to_string(),
            request_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            stream_idle_timeout: Duration::from_secs(60),
        }
    }
}

/// `ChatModel` speaking the OpenAI chat-completions protocol over HTTP.
pub struct OpenAiCompatibleModel {
    config: OpenAiCompatibleConfig,
    http: reqwest::Client,
}

impl OpenAiCompatibleModel {
    pub fn new(config: OpenAiCompatibleConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn body(&self, request: &GenerationRequest, stream: bool) -> WireRequest {
        let options = &request.options;
        WireRequest {
            model: options.model.clone().unwrap_or_else(|| self.config.model.clone()),
            messages: request.messages.iter().map(wire_message).collect(),
            tools: request.tools.iter().map(wire_tool).collect(),
            top_p: options.top_p,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream,
        }
    }

    async fn send(&self, body: &WireRequest, timeout: Option<Duration>) -> Result<reqwest::Response, ChatError> {
        debug!(
            model = %body.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            stream = body.stream,
            "Sending chat completion request"
        );

        let mut builder = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(body);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                code: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleModel {
    async fn complete(&self, request: GenerationRequest) -> Result<Generation, ChatError> {
        let body = self.body(&request, false);
        let response = self.send(&body, Some(self.config.request_timeout)).await?;
        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))?;
        generation_from_wire(wire)
    }

    async fn stream(&self, request: GenerationRequest) -> Result<DeltaStream, ChatError> {
        let body = self.body(&request, true);
        let idle = self.config.stream_idle_timeout;
        // No total timeout: a long answer may stream for minutes.
        let response = tokio::time::timeout(idle, self.send(&body, None))
            .await
            .map_err(|_| ChatError::Transport(format!("no response headers within {:?}", idle)))??;
        Ok(decode_sse(response.bytes_stream(), idle))
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

fn wire_message(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System { content } => json!({ "role": "system", "content": content }),
        ChatMessage::User { content } => json!({ "role": "user", "content": content }),
        ChatMessage::Assistant { content, tool_calls } if tool_calls.is_empty() => {
            json!({ "role": "assistant", "content": content })
        }
        ChatMessage::Assistant { content, tool_calls } => {
            let calls: Vec<Value> = tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": call.arguments }
                    })
                })
                .collect();
            json!({ "role": "assistant", "content": content, "tool_calls": calls })
        }
        ChatMessage::Tool {
            tool_call_id,
            name,
            content,
        } => json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "name": name,
            "content": content
        }),
    }
}

fn wire_tool(tool: &ToolDescriptor) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Option<String>,
}

fn generation_from_wire(wire: WireResponse) -> Result<Generation, ChatError> {
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ChatError::Decode("response contained no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            id: ToolCallId::new(call.id),
            name: ToolName::new(call.function.name),
            arguments: call.function.arguments.unwrap_or_default(),
        })
        .collect();

    Ok(Generation {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
    })
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireDeltaChoice>,
}

#[derive(Debug, Deserialize)]
struct WireDeltaChoice {
    #[serde(default)]
    delta: Option<WireDelta>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Turn one `data:` payload into deltas.
fn parse_chunk(payload: &str) -> Result<Vec<GenerationDelta>, ChatError> {
    let chunk: WireChunk =
        serde_json::from_str(payload).map_err(|e| ChatError::Decode(format!("{}: {}", e, payload)))?;

    let mut deltas = Vec::new();
    for choice in chunk.choices {
        let Some(delta) = choice.delta else { continue };
        if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
            deltas.push(GenerationDelta::Text(text));
        }
        for call in delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            deltas.push(GenerationDelta::ToolCall {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
    }
    Ok(deltas)
}

type PayloadStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

struct SseState {
    payloads: PayloadStream,
    idle_timeout: Duration,
    pending: VecDeque<Result<GenerationDelta, ChatError>>,
    done: bool,
}

impl SseState {
    /// Queue deltas for one event payload; stops at `[DONE]` or the first bad chunk.
    fn accept(&mut self, payload: &str) {
        if payload == "[DONE]" {
            self.done = true;
            return;
        }
        if payload.is_empty() {
            return;
        }
        match parse_chunk(payload) {
            Ok(deltas) => self.pending.extend(deltas.into_iter().map(Ok)),
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, error: ChatError) {
        self.pending.push_back(Err(error));
        self.done = true;
    }
}

/// Decode an SSE byte stream of chat-completion chunks into deltas.
///
/// Waiting longer than `idle_timeout` for the next event ends the stream
/// with a transport error.
fn decode_sse<S, B, E>(bytes: S, idle_timeout: Duration) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let payloads: PayloadStream = Box::pin(bytes.eventsource().map(|event| match event {
        Ok(event) => Ok(event.data),
        Err(EventStreamError::Transport(e)) => Err(ChatError::Transport(e.to_string())),
        Err(e) => Err(ChatError::Decode(e.to_string())),
    }));
    let state = SseState {
        payloads,
        idle_timeout,
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match tokio::time::timeout(state.idle_timeout, state.payloads.next()).await {
                Ok(Some(Ok(payload))) => state.accept(&payload),
                Ok(Some(Err(e))) => state.fail(e),
                Ok(None) => state.done = true,
                Err(_) => {
                    let idle = state.idle_timeout;
                    state.fail(ChatError::Transport(format!("no stream data for {:?}", idle)));
                }
            }
        }
    }))
}
