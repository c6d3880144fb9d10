//! Conversation persistence layer
//!
//! Conversations are keyed by id and saved whole after each turn.
//! Currently in-memory only.

use crate::models::ConversationState;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for conversation persistence
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>>;
    async fn save(&self, state: &ConversationState) -> Result<()>;
    async fn delete(&self, conversation_id: &str) -> Result<bool>;
}

/// In-memory conversation store for development
pub struct InMemoryConversationStore {
    conversations: Arc<RwLock<HashMap<String, ConversationState>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(conversation_id).cloned())
    }

    async fn save(&self, state: &ConversationState) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        conversations.insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, conversation_id: &str) -> Result<bool> {
        let mut conversations = self.conversations.write().await;
        Ok(conversations.remove(conversation_id).is_some())
    }
}
