//! String newtypes used across the dispatch layer.
//!
//! These keep semantically different strings apart (e.g., passing a
//! conversation id where a tool name is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declares a string newtype with conversions, `Display` and `Borrow<str>`
/// (so maps keyed by it can be queried with a plain `&str`).
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Name of a registered tool (e.g., "getCityTime").
    ///
    /// Unique within a `ToolRegistry`; this is the identifier the model
    /// uses when it asks for a tool invocation.
    ToolName
);

newtype_string!(
    /// Opaque key scoping chat history across calls.
    ///
    /// Supplied by callers (path segment `/advisor/chat/{conversationId}`)
    /// and only ever compared for equality.
    ConversationId
);

newtype_string!(
    /// Identifier the model attaches to one tool call so the tool result
    /// can be matched back to it.
    ToolCallId
);

impl ToolCallId {
    /// Generate a fresh call id for invocations that did not come with one.
    pub fn generate() -> Self {
        Self(format!("call_{}", uuid::Uuid::new_v4().simple()))
    }
}
