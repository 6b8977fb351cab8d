//! Tool dispatch façade.
//!
//! A `Dispatcher` answers one query at a time: it decides which tools the
//! model may call, runs the model, executes the tool calls the model asks
//! for, feeds their results back, and repeats until the model produces a
//! plain answer. The answer is returned whole (`respond`) or as an ordered
//! stream of text fragments (`respond_stream`).
//!
//! The answer text is everything the model wrote across all rounds, so a
//! streamed answer always concatenates to what `respond` returns for the same
//! model behaviour.

mod stream;

#[cfg(test)]
mod integration_tests;

pub use stream::AnswerStream;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chat::{ChatError, ChatMessage, ChatModel, ChatOptions, GenerationRequest, ToolCall, ToolDescriptor};
use crate::error::DispatchError;
use crate::memory::ChatMemory;
use crate::schema::{parse_arguments, validate_arguments};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{ConversationId, ToolName};

/// Default limit on model rounds that end in tool calls.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

/// Which registered tools the model may call for one query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolSelection {
    /// No tools; the model answers on its own.
    #[default]
    None,
    /// Exactly the named tools. Every name must be registered.
    ByName(Vec<ToolName>),
    /// Every registered tool, described by its input schema.
    BySchema,
}

impl ToolSelection {
    /// Select tools by name.
    pub fn by_name<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ToolName>,
    {
        Self::ByName(names.into_iter().map(Into::into).collect())
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ByName(_) => "by_name",
            Self::BySchema => "by_schema",
        }
    }
}

/// One question for the dispatcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub text: String,
    /// Scopes history when the dispatcher has a memory.
    pub conversation_id: Option<ConversationId>,
    /// Per-query sampling options; unset fields fall back to the dispatcher defaults.
    pub options: ChatOptions,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_conversation(mut self, id: impl Into<ConversationId>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}

/// Conversation state of one query while it is being answered.
struct Turn {
    messages: Vec<ChatMessage>,
    offered: Vec<ToolDescriptor>,
    options: ChatOptions,
    /// Output of each tool already invoked for this query.
    outputs: HashMap<ToolName, String>,
}

impl Turn {
    fn request(&self) -> GenerationRequest {
        GenerationRequest {
            messages: self.messages.clone(),
            tools: self.offered.clone(),
            options: self.options.clone(),
        }
    }

    /// Record an assistant turn that asked for tools, followed by the results.
    fn push_tool_round(&mut self, content: String, calls: Vec<ToolCall>, results: Vec<ChatMessage>) {
        self.messages.push(ChatMessage::assistant_with_tools(content, calls));
        self.messages.extend(results);
    }
}

/// A call that passed validation and is ready to run.
struct PreparedCall {
    call: ToolCall,
    args: serde_json::Map<String, serde_json::Value>,
}

pub(crate) fn upstream(err: ChatError) -> DispatchError {
    DispatchError::UpstreamGeneration(err.to_string())
}

/// Answers queries with a chat model and a fixed tool registry.
#[derive(Clone)]
pub struct Dispatcher {
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
    memory: Option<Arc<dyn ChatMemory>>,
    system_prompt: Option<String>,
    default_options: ChatOptions,
    max_tool_rounds: usize,
}

impl Dispatcher {
    pub fn new(model: Arc<dyn ChatModel>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            model,
            registry,
            memory: None,
            system_prompt: None,
            default_options: ChatOptions::default(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn ChatMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_default_options(mut self, options: ChatOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Answer `query`, returning the complete text.
    pub async fn respond(&self, query: Query, selection: ToolSelection) -> Result<String, DispatchError> {
        let mut turn = self.prepare(&query, &selection).await?;
        let mut answer = String::new();

        for round in 0..=self.max_tool_rounds {
            let generation = self.model.complete(turn.request()).await.map_err(upstream)?;
            answer.push_str(&generation.content);

            if generation.tool_calls.is_empty() {
                self.remember(&query, &answer).await;
                return Ok(answer);
            }
            if round == self.max_tool_rounds {
                break;
            }

            let results = self.run_tool_calls(&generation.tool_calls, &mut turn, &query).await?;
            turn.push_tool_round(generation.content, generation.tool_calls, results);
        }

        Err(self.round_limit_exceeded())
    }

    /// Answer `query` as a stream of text fragments.
    ///
    /// Query and tool-selection problems are reported here, before any model
    /// call. Failures after that arrive as the final item of the stream.
    pub async fn respond_stream(&self, query: Query, selection: ToolSelection) -> Result<AnswerStream, DispatchError> {
        let turn = self.prepare(&query, &selection).await?;
        Ok(stream::spawn(self.clone(), query, turn))
    }

    /// Validate the query, resolve offered tools and assemble the opening messages.
    async fn prepare(&self, query: &Query, selection: &ToolSelection) -> Result<Turn, DispatchError> {
        if query.text.trim().is_empty() {
            return Err(DispatchError::InvalidQuery("query must not be empty".to_string()));
        }

        let offered = self.resolve_tools(selection)?;
        info!(
            selection = selection.label(),
            tools = offered.len(),
            conversation = query.conversation_id.as_ref().map(|c| c.as_str()).unwrap_or("-"),
            "Dispatching query"
        );

        let mut messages = Vec::new();
        if let Some(prompt) = &self.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }
        if let (Some(memory), Some(id)) = (&self.memory, &query.conversation_id) {
            let history = memory.history(id).await;
            debug!("Loaded {} history messages for conversation {}", history.len(), id);
            messages.extend(history);
        }
        messages.push(ChatMessage::user(query.text.clone()));

        Ok(Turn {
            messages,
            offered,
            options: query.options.merged_over(&self.default_options),
            outputs: HashMap::new(),
        })
    }

    fn resolve_tools(&self, selection: &ToolSelection) -> Result<Vec<ToolDescriptor>, DispatchError> {
        match selection {
            ToolSelection::None => Ok(Vec::new()),
            ToolSelection::BySchema => Ok(self.registry.descriptors()),
            ToolSelection::ByName(names) => {
                let mut seen = BTreeSet::new();
                let mut offered = Vec::new();
                for name in names {
                    let handler = self
                        .registry
                        .get(name.as_str())
                        .ok_or_else(|| DispatchError::UnknownTool(name.clone()))?;
                    if seen.insert(name.clone()) {
                        offered.push(handler.descriptor());
                    }
                }
                Ok(offered)
            }
        }
    }

    /// Validate every call of one round, then run them in order.
    ///
    /// A round with any invalid call runs none of its calls. Each tool runs
    /// at most once per query; a repeated call gets the first output.
    async fn run_tool_calls(
        &self,
        calls: &[ToolCall],
        turn: &mut Turn,
        query: &Query,
    ) -> Result<Vec<ChatMessage>, DispatchError> {
        let mut prepared = Vec::with_capacity(calls.len());
        for call in calls {
            let descriptor = turn
                .offered
                .iter()
                .find(|d| d.name == call.name)
                .ok_or_else(|| {
                    warn!("Model asked for tool {} which was not offered", call.name);
                    DispatchError::UnknownTool(call.name.clone()).caused_by_model()
                })?;

            let invalid = |reason: String| {
                DispatchError::ArgumentValidation {
                    tool: call.name.clone(),
                    reason,
                }
                .caused_by_model()
            };
            let args = parse_arguments(&call.arguments).map_err(invalid)?;
            validate_arguments(&descriptor.input_schema, &args).map_err(invalid)?;
            prepared.push(PreparedCall {
                call: call.clone(),
                args,
            });
        }

        let mut results = Vec::with_capacity(prepared.len());
        for PreparedCall { call, args } in prepared {
            let output = match turn.outputs.get(&call.name) {
                Some(output) => {
                    debug!("Tool {} already ran for this query; reusing its output", call.name);
                    output.clone()
                }
                None => {
                    let ctx = ToolContext::new(query.conversation_id.clone(), call.id.clone());
                    let output = self
                        .registry
                        .invoke(call.name.as_str(), args, &ctx)
                        .await
                        .map_err(DispatchError::caused_by_model)?;
                    debug!("Tool {} returned {} bytes", call.name, output.len());
                    turn.outputs.insert(call.name.clone(), output.clone());
                    output
                }
            };
            results.push(ChatMessage::tool_result(&call, output));
        }
        Ok(results)
    }

    /// Record a successful exchange in the conversation's history.
    async fn remember(&self, query: &Query, answer: &str) {
        if let (Some(memory), Some(id)) = (&self.memory, &query.conversation_id) {
            memory
                .append(
                    id,
                    vec![ChatMessage::user(query.text.clone()), ChatMessage::assistant(answer)],
                )
                .await;
        }
    }

    fn round_limit_exceeded(&self) -> DispatchError {
        warn!("Tool round limit of {} exceeded", self.max_tool_rounds);
        DispatchError::UpstreamGeneration(format!(
            "tool round limit of {} exceeded",
            self.max_tool_rounds
        ))
    }
}
