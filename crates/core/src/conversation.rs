//! Conversation Types
//!
//! Read-side view of the host application's conversation store and the
//! compact payload handed to analysis backends.

use serde::{Deserialize, Serialize};

/// A stored conversation (one imported chat session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    /// Source assistant, e.g. "claude_code", "cursor"
    pub provider: String,
    pub project_path: Option<String>,
    /// RFC 3339 timestamp
    pub created_at: String,
    /// RFC 3339 timestamp
    pub updated_at: String,
}

/// One message of a stored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

/// Message as sent to a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadMessage {
    pub id: String,
    pub role: String,
    pub content: String,
}

impl From<&ConversationMessage> for PayloadMessage {
    fn from(msg: &ConversationMessage) -> Self {
        Self {
            id: msg.id.clone(),
            role: msg.role.clone(),
            content: msg.content.clone(),
        }
    }
}

/// Compact, redacted, size-bounded representation of one conversation.
///
/// `id` is the queue item id so backend results can be correlated back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPayload {
    pub id: String,
    pub title: String,
    pub messages: Vec<PayloadMessage>,
    /// Message count of the original conversation
    pub message_count: usize,
    pub estimated_character_count: usize,
    pub was_truncated: bool,
    pub metadata_only: bool,
}

impl ConversationPayload {
    /// Sum of title and message content lengths, in characters
    pub fn compute_character_count(&self) -> usize {
        self.title.chars().count()
            + self
                .messages
                .iter()
                .map(|m| m.content.chars().count() + m.role.len())
                .sum::<usize>()
    }

    /// Recompute `estimated_character_count` after the messages changed
    pub fn refresh_estimate(&mut self) {
        self.estimated_character_count = self.compute_character_count();
    }

    /// Rough token estimate (4 characters per token)
    pub fn estimated_tokens(&self) -> usize {
        self.estimated_character_count.div_ceil(4)
    }
}

/// Subject filter for a full scan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanScope {
    /// Only conversations updated at or after this RFC 3339 timestamp
    #[serde(default)]
    pub since: Option<String>,
    /// Only conversations updated at or before this RFC 3339 timestamp
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub project_path: Option<String>,
    /// Provider allow-list; empty means all providers
    #[serde(default)]
    pub providers: Vec<String>,
}

impl ScanScope {
    /// Whether a conversation falls inside this scope.
    ///
    /// Timestamps are compared lexically, which holds for RFC 3339 UTC strings.
    pub fn matches(&self, conversation: &Conversation) -> bool {
        if let Some(since) = &self.since {
            if conversation.updated_at.as_str() < since.as_str() {
                return false;
            }
        }
        if let Some(until) = &self.until {
            if conversation.updated_at.as_str() > until.as_str() {
                return false;
            }
        }
        if let Some(project) = &self.project_path {
            if conversation.project_path.as_deref() != Some(project.as_str()) {
                return false;
            }
        }
        if !self.providers.is_empty() && !self.providers.iter().any(|p| p == &conversation.provider) {
            return false;
        }
        true
    }
}
