//! Conversation messages (tree nodes).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::MessageId;
use super::parts::MessagePart;

/// Message author role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    /// Produced by a delegated background agent; hidden from transcripts.
    Subagent,
}

/// Structural kind of a message. Distinguishes ordinary turns from the
/// records written when a conversation is compacted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Ordinary conversation turn.
    #[default]
    Normal,
    /// Internal prompt that drove a compaction; never rendered.
    CompactPrompt,
    /// Summary produced by a compaction; rendered even without parts.
    CompactSummary,
}

/// One message in a session tree. Serialized as a single JSONL record with
/// the application's camelCase field names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message ID
    pub id: MessageId,
    /// Parent message ID (None for root)
    #[serde(default)]
    pub parent_message_id: Option<MessageId>,
    /// Author role
    pub role: Role,
    /// Structural kind (older logs omit it)
    #[serde(default)]
    pub message_kind: MessageKind,
    /// Ordered content segments
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    /// Opaque application metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Creation timestamp; orders siblings
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a root message with a fresh id.
    pub fn new(role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            id: MessageId::new(),
            parent_message_id: None,
            role,
            message_kind: MessageKind::Normal,
            parts,
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Create a new user message
    pub fn user(parts: Vec<MessagePart>) -> Self {
        Self::new(Role::User, parts)
    }

    /// Create a new assistant message
    pub fn assistant(parts: Vec<MessagePart>) -> Self {
        Self::new(Role::Assistant, parts)
    }

    /// Create a new system message
    pub fn system(parts: Vec<MessagePart>) -> Self {
        Self::new(Role::System, parts)
    }

    /// Create a new subagent message
    pub fn subagent(parts: Vec<MessagePart>) -> Self {
        Self::new(Role::Subagent, parts)
    }

    /// Set message ID
    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }

    /// Set parent ID
    pub fn with_parent(mut self, parent_id: impl Into<MessageId>) -> Self {
        self.parent_message_id = Some(parent_id.into());
        self
    }

    /// Set structural kind
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.message_kind = kind;
        self
    }

    /// Set creation timestamp
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Set metadata map
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Shallow-merge a metadata delta into this message. An explicit JSON
    /// `null` removes the key; any other value replaces it.
    pub fn merge_metadata(&mut self, delta: &Map<String, Value>) {
        for (key, value) in delta {
            if value.is_null() {
                self.metadata.remove(key);
            } else {
                self.metadata.insert(key.clone(), value.clone());
            }
        }
    }
}
