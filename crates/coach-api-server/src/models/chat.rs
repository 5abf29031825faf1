use serde::{Deserialize, Serialize};

/// Placeholder used for any missing user / conversation identifier
pub const DEFAULT_ID: &str = "default";

// ===== CONVERSATION TURNS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation, also the wire format of chat completions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

// ===== REQUEST MODELS =====

#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearHistoryRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub user_id: String,
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<HistoryEntry>,
    pub user_id: String,
    pub conversation_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearHistoryResponse {
    pub status: String,
    pub message: String,
    pub user_id: String,
    pub conversation_id: String,
}

// ===== IDENTITY =====

/// Caller-facing identity of a conversation: `user_id` + `conversation_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRef {
    pub user_id: String,
    pub conversation_id: String,
}

impl ConversationRef {
    /// Missing or blank parts fall back to [`DEFAULT_ID`].
    pub fn new(user_id: Option<String>, conversation_id: Option<String>) -> Self {
        Self {
            user_id: or_default(user_id),
            conversation_id: or_default(conversation_id),
        }
    }

    /// Composite key handed to the thread resolver
    pub fn external_id(&self) -> String {
        format!("{}:{}", self.user_id, self.conversation_id)
    }
}

fn or_default(value: Option<String>) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ID.to_string())
}
