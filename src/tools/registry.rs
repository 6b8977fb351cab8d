//! Tool registry for managing tool handlers.
//!
//! Provides a `ToolHandler` trait for implementing tools and a `ToolRegistry`
//! for registering and invoking them. The registry is built once at startup
//! and shared read-only by the dispatcher and the MCP server.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Result, bail};
use rmcp::model::{JsonObject, Tool as McpTool};
use tracing::{debug, warn};

use crate::chat::ToolDescriptor;
use crate::error::{DispatchError, ToolError};
use crate::schema::validate_arguments;
use crate::types::{ConversationId, ToolCallId, ToolName};

/// Boxed future returned by `ToolHandler::execute`.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

/// Context passed to tool handlers during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Conversation the invocation belongs to, if any.
    pub conversation_id: Option<ConversationId>,
    /// Id of the model's tool call (generated for MCP calls).
    pub call_id: ToolCallId,
}

impl ToolContext {
    pub fn new(conversation_id: Option<ConversationId>, call_id: ToolCallId) -> Self {
        Self {
            conversation_id,
            call_id,
        }
    }

    /// Context for an invocation with no conversation and a fresh call id.
    pub fn detached() -> Self {
        Self::new(None, ToolCallId::generate())
    }
}

/// Trait for handling tool invocations.
///
/// Each tool implements this trait to define its schema and execution logic.
pub trait ToolHandler: Send + Sync {
    /// Returns the tool's name (e.g., "getCityTime").
    fn name(&self) -> &str;

    /// Returns the tool's human-readable title.
    fn title(&self) -> Option<&str> {
        None
    }

    /// Returns the tool's description.
    fn description(&self) -> &str;

    /// Returns the JSON Schema for this tool's arguments.
    fn input_schema(&self) -> JsonObject;

    /// Executes the tool with already validated arguments.
    fn execute(&self, args: JsonObject, ctx: &ToolContext) -> ToolFuture<'_>;

    /// What the generation model is told about this tool.
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: ToolName::new(self.name()),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }

    /// Converts this handler to an `McpTool` for use in `list_tools`.
    fn to_mcp_tool(&self) -> McpTool {
        use std::borrow::Cow;

        McpTool {
            name: Cow::Owned(self.name().to_string()),
            title: self.title().map(|s| s.to_string()),
            description: Some(Cow::Owned(self.description().to_string())),
            input_schema: Arc::new(self.input_schema()),
            output_schema: None,
            annotations: None,
            icons: None,
            meta: None,
        }
    }
}

/// Registry of tool handlers, ordered by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: BTreeMap<ToolName, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared tool handler. Fails if the name is already taken.
    pub fn register(mut self, handler: Arc<dyn ToolHandler>) -> Result<Self> {
        let name = ToolName::new(handler.name());
        if name.as_str().is_empty() {
            bail!("Tool name must not be empty");
        }
        if self.handlers.contains_key(&name) {
            bail!("Tool already registered: {}", name);
        }
        debug!("Registered tool {}", name);
        self.handlers.insert(name, handler);
        Ok(self)
    }

    /// Register a tool handler from a type that implements `ToolHandler`.
    pub fn register_handler<T: ToolHandler + 'static>(self, handler: T) -> Result<Self> {
        self.register(Arc::new(handler))
    }

    /// Get a tool handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Check if a tool with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// List all registered tool names, sorted.
    pub fn list_names(&self) -> Vec<ToolName> {
        self.handlers.keys().cloned().collect()
    }

    /// Descriptors of every registered tool, sorted by name.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.handlers.values().map(|h| h.descriptor()).collect()
    }

    /// Get all registered tools as `McpTool` instances for `list_tools`.
    pub fn list_tools(&self) -> Vec<McpTool> {
        self.handlers.values().map(|h| h.to_mcp_tool()).collect()
    }

    /// Look up, validate and run one tool.
    pub async fn invoke(&self, name: &str, args: JsonObject, ctx: &ToolContext) -> Result<String, DispatchError> {
        let tool = ToolName::new(name);
        let handler = self
            .get(name)
            .ok_or_else(|| DispatchError::UnknownTool(tool.clone()))?;

        validate_arguments(&handler.input_schema(), &args).map_err(|reason| DispatchError::ArgumentValidation {
            tool: tool.clone(),
            reason,
        })?;

        debug!("Invoking tool {} (call {})", tool, ctx.call_id);
        handler.execute(args, ctx).await.map_err(|e| {
            warn!("Tool {} failed: {}", tool, e);
            DispatchError::from_tool(&tool, e)
        })
    }

    /// Return the number of registered tools.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Return `true` if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
