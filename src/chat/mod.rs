//! Chat-generation collaborator.
//!
//! - `ChatModel`: one model turn, complete or streamed
//! - `OpenAiCompatibleModel`: HTTP client for OpenAI-compatible providers (DashScope)
//! - `MockChatModel`: scripted model for tests

mod client;
mod mock;
mod openai;
mod types;

pub use client::{ChatError, ChatModel, DeltaStream};
pub use mock::MockChatModel;
pub use openai::{DASHSCOPE_COMPATIBLE_BASE, OpenAiCompatibleConfig, OpenAiCompatibleModel};
pub use types::{
    ChatMessage, ChatOptions, Generation, GenerationDelta, GenerationRequest, ToolCall, ToolCallAccumulator,
    ToolDescriptor,
};
