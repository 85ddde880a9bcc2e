//! Backend response models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Conversation identifier as assigned by the backend
pub type ConversationId = i64;

/// Message identifier; strictly increasing within a conversation
pub type MessageId = i64;

/// Conversation summary; the polling layer never looks inside it
pub type Conversation = Value;

/// A chat message
///
/// Only `id` matters to the polling layer. Every other field the backend
/// sends (body, sender, timestamps, attachments) is kept untouched in
/// `payload` and handed to the subscriber as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID
    pub id: MessageId,
    /// Remaining message fields
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Message {
    /// Create a message with an empty payload
    pub fn new(id: MessageId) -> Self {
        Self {
            id,
            payload: Map::new(),
        }
    }

    /// Attach a payload field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Look up a payload field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

// Internal response types for deserialization

/// Standard backend envelope: `{ "success": bool, "data": ..., "message": ... }`
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagePage {
    #[serde(default)]
    pub messages: Vec<Message>,
}
