//! Usage events emitted by the chat application
//!
//! Events arrive from the host application as structured records and are
//! immutable once accepted. Each event type carries only the fields that are
//! relevant to it; there is no loosely typed payload bag.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::validation_constants::identifiers::MAX_IDENTIFIER_LENGTH;

/// Globally unique identifier supplied by the event source
///
/// Uniqueness is the producer's responsibility; the processor relies on it to
/// reject re-delivered events.
#[nutype(
    sanitize(trim),
    validate(predicate = |id: &str| !id.is_empty() && id.chars().count() <= MAX_IDENTIFIER_LENGTH),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct EventId(String);

/// Identifier of the conversation an event belongs to
#[nutype(
    sanitize(trim),
    validate(predicate = |id: &str| !id.is_empty() && id.chars().count() <= MAX_IDENTIFIER_LENGTH),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct ConversationId(String);

/// Identifier of the user an event belongs to
#[nutype(
    sanitize(trim),
    validate(predicate = |id: &str| !id.is_empty() && id.chars().count() <= MAX_IDENTIFIER_LENGTH),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct UserId(String);

/// The closed set of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ConversationCreated,
    MessageSent,
    TokenUsage,
    UserActivity,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        Self::ConversationCreated,
        Self::MessageSent,
        Self::TokenUsage,
        Self::UserActivity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConversationCreated => "conversation_created",
            Self::MessageSent => "message_sent",
            Self::TokenUsage => "token_usage",
            Self::UserActivity => "user_activity",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationCreated {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSent {
    pub role: MessageRole,
    /// Message length in characters
    pub content_length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivity {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_in_session: Option<u64>,
}

/// Type-specific event payload, tagged by `type` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    ConversationCreated(ConversationCreated),
    MessageSent(MessageSent),
    TokenUsage(TokenUsage),
    UserActivity(UserActivity),
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::ConversationCreated(_) => EventType::ConversationCreated,
            Self::MessageSent(_) => EventType::MessageSent,
            Self::TokenUsage(_) => EventType::TokenUsage,
            Self::UserActivity(_) => EventType::UserActivity,
        }
    }
}

/// A single usage event
///
/// Serialises as `{id, type, timestamp, conversationId?, userId?, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    id: EventId,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<UserId>,
    #[serde(flatten)]
    kind: EventKind,
}

impl Event {
    pub fn new(id: EventId, timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self {
            id,
            timestamp,
            conversation_id: None,
            user_id: None,
            kind,
        }
    }

    pub fn with_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Parse an event from its JSON boundary representation
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }
}
