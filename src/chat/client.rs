//! The generation model seam.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::types::{Generation, GenerationDelta, GenerationRequest};

/// Stream of deltas for one model turn.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<GenerationDelta, ChatError>> + Send>>;

/// Errors raised by a chat model client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The request never produced an HTTP response (connect, timeout, ...).
    Transport(String),

    /// The provider answered with a non-success status.
    Status { code: u16, body: String },

    /// The provider's response could not be understood.
    Decode(String),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::Status { code, body } => write!(f, "provider returned {}: {}", code, body),
            Self::Decode(msg) => write!(f, "malformed provider response: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

/// A chat-generation backend. Each call is one model turn; history and tool
/// results are carried in the request messages.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one turn to completion.
    async fn complete(&self, request: GenerationRequest) -> Result<Generation, ChatError>;

    /// Run one turn, yielding text and tool-call fragments as they arrive.
    async fn stream(&self, request: GenerationRequest) -> Result<DeltaStream, ChatError>;
}
