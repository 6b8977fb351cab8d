//! Error types for tool dispatch.
//!
//! `ToolError` is raised by tool implementations. `DispatchError` is what
//! callers of the dispatch layer see; every failure of a single query ends up
//! as one of its variants.

use std::fmt;

use crate::types::ToolName;

/// Errors raised by a tool's own implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// The tool rejected its input (e.g., an unknown time zone id).
    InvalidArguments(String),

    /// The tool accepted its input but could not produce a result
    /// (e.g., the remote translation service is unreachable).
    Execution(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArguments(msg) => write!(f, "Invalid arguments: {}", msg),
            Self::Execution(msg) => write!(f, "Execution failed: {}", msg),
        }
    }
}

impl std::error::Error for ToolError {}

/// Errors surfaced to callers of the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The query text was empty.
    InvalidQuery(String),

    /// A tool name was requested that is not registered (or not offered).
    UnknownTool(ToolName),

    /// Arguments did not satisfy the tool's declared schema.
    ArgumentValidation { tool: ToolName, reason: String },

    /// The tool itself failed while executing.
    ToolExecution { tool: ToolName, reason: String },

    /// The generation model or its transport failed.
    UpstreamGeneration(String),

    /// The model asked for a tool call that could not be honoured: a tool
    /// outside the offered set, or arguments the tool rejects. Wraps the
    /// `UnknownTool` or `ArgumentValidation` error it produced.
    ModelToolCall(Box<DispatchError>),
}

impl DispatchError {
    /// Short machine-readable kind, used in HTTP error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "invalid_query",
            Self::UnknownTool(_) => "unknown_tool",
            Self::ArgumentValidation { .. } => "argument_validation",
            Self::ToolExecution { .. } => "tool_execution",
            Self::UpstreamGeneration(_) => "upstream_generation",
            Self::ModelToolCall(inner) => inner.kind(),
        }
    }

    /// Whether the failure was caused by the caller's input rather than a
    /// downstream service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuery(_) | Self::UnknownTool(_) | Self::ArgumentValidation { .. }
        )
    }

    /// Mark an error as caused by the model's own tool call. Only tool
    /// lookup and argument errors are affected.
    pub fn caused_by_model(self) -> Self {
        match self {
            Self::UnknownTool(_) | Self::ArgumentValidation { .. } => Self::ModelToolCall(Box::new(self)),
            other => other,
        }
    }

    /// The underlying error, without the model-call wrapper.
    pub fn root(&self) -> &DispatchError {
        match self {
            Self::ModelToolCall(inner) => inner.root(),
            other => other,
        }
    }

    /// Attach a tool name to an error raised by that tool.
    pub fn from_tool(tool: &ToolName, err: ToolError) -> Self {
        match err {
            ToolError::InvalidArguments(reason) => Self::ArgumentValidation {
                tool: tool.clone(),
                reason,
            },
            ToolError::Execution(reason) => Self::ToolExecution {
                tool: tool.clone(),
                reason,
            },
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidQuery(msg) => write!(f, "Invalid query: {}", msg),
            Self::UnknownTool(name) => write!(f, "Unknown tool: {}", name),
            Self::ArgumentValidation { tool, reason } => {
                write!(f, "Invalid arguments for tool {}: {}", tool, reason)
            }
            Self::ToolExecution { tool, reason } => {
                write!(f, "Tool {} failed: {}", tool, reason)
            }
            Self::UpstreamGeneration(msg) => write!(f, "Upstream generation failed: {}", msg),
            Self::ModelToolCall(inner) => inner.fmt(f),
        }
    }
}

impl std::error::Error for DispatchError {}
