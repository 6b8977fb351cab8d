//! Conversation-scoped chat history.
//!
//! Operations on one conversation id are serialised by a per-id mutex;
//! different ids proceed concurrently.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::chat::ChatMessage;
use crate::types::ConversationId;

/// Default number of messages kept per conversation.
pub const DEFAULT_MAX_MESSAGES: usize = 20;

/// Default number of conversations kept at once.
pub const DEFAULT_MAX_CONVERSATIONS: usize = 1024;

/// Storage for per-conversation message history.
#[async_trait]
pub trait ChatMemory: Send + Sync {
    /// Messages recorded for `id`, oldest first. Unknown ids have no history.
    async fn history(&self, id: &ConversationId) -> Vec<ChatMessage>;

    /// Append messages to the history of `id`.
    async fn append(&self, id: &ConversationId, messages: Vec<ChatMessage>);

    /// Forget everything recorded for `id`.
    async fn clear(&self, id: &ConversationId);
}

#[derive(Default)]
struct Conversation {
    messages: Mutex<VecDeque<ChatMessage>>,
    last_used: AtomicU64,
}

/// Keeps the most recent `max_messages` messages of each conversation in
/// process memory. At most `max_conversations` ids are tracked; a new id
/// past that limit evicts the least recently used one.
pub struct MessageWindowMemory {
    max_messages: usize,
    max_conversations: usize,
    clock: AtomicU64,
    conversations: RwLock<HashMap<ConversationId, Arc<Conversation>>>,
}

impl MessageWindowMemory {
    pub fn new() -> Self {
        Self::with_max_messages(DEFAULT_MAX_MESSAGES)
    }

    pub fn with_max_messages(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            max_conversations: DEFAULT_MAX_CONVERSATIONS,
            clock: AtomicU64::new(0),
            conversations: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_max_conversations(mut self, max_conversations: usize) -> Self {
        self.max_conversations = max_conversations.max(1);
        self
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn conversation(&self, id: &ConversationId) -> Arc<Conversation> {
        if let Some(conversation) = self.conversations.read().await.get(id) {
            return conversation.clone();
        }

        let mut conversations = self.conversations.write().await;
        if let Some(conversation) = conversations.get(id) {
            return conversation.clone();
        }
        if conversations.len() >= self.max_conversations {
            let oldest = conversations
                .iter()
                .min_by_key(|(_, c)| c.last_used.load(Ordering::Relaxed))
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                debug!("Evicting conversation {}", oldest);
                conversations.remove(&oldest);
            }
        }
        let conversation = Arc::new(Conversation {
            last_used: AtomicU64::new(self.tick()),
            ..Default::default()
        });
        conversations.insert(id.clone(), conversation.clone());
        conversation
    }

    async fn is_tracked(&self, id: &ConversationId, conversation: &Arc<Conversation>) -> bool {
        self.conversations
            .read()
            .await
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, conversation))
    }

    /// Number of conversations with recorded history.
    pub async fn conversation_count(&self) -> usize {
        self.conversations.read().await.len()
    }
}

impl Default for MessageWindowMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatMemory for MessageWindowMemory {
    async fn history(&self, id: &ConversationId) -> Vec<ChatMessage> {
        let conversation = match self.conversations.read().await.get(id) {
            Some(conversation) => conversation.clone(),
            None => return Vec::new(),
        };
        conversation.last_used.store(self.tick(), Ordering::Relaxed);
        let guard = conversation.messages.lock().await;
        guard.iter().cloned().collect()
    }

    async fn append(&self, id: &ConversationId, messages: Vec<ChatMessage>) {
        loop {
            let conversation = self.conversation(id).await;
            let mut guard = conversation.messages.lock().await;
            // Evicted between lookup and lock; start over with a fresh entry.
            if !self.is_tracked(id, &conversation).await {
                continue;
            }
            conversation.last_used.store(self.tick(), Ordering::Relaxed);
            guard.extend(messages);
            while guard.len() > self.max_messages {
                guard.pop_front();
            }
            debug!("Conversation {} now holds {} messages", id, guard.len());
            return;
        }
    }

    /// Empties the window under its own lock, so a concurrent append either
    /// lands before the clear or survives it intact.
    async fn clear(&self, id: &ConversationId) {
        let conversation = self.conversations.read().await.get(id).cloned();
        if let Some(conversation) = conversation {
            conversation.messages.lock().await.clear();
        }
    }
}
