//! Dialogue state accumulated by a conversation context.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{ChatMessage, Role};

/// Message history of one conversation context.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    /// Session identifier, used in logs
    pub id: Uuid,
    /// Message history, oldest first
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_message(&mut self, role: Role, content: String) {
        self.messages.push(ChatMessage { role, content });
        self.updated_at = Utc::now();
    }

    /// Record a completed exchange.
    pub fn add_turn(&mut self, user: String, assistant: String) {
        self.add_message(Role::User, user);
        self.add_message(Role::Assistant, assistant);
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}
