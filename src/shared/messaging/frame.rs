//! Wire frames exchanged with the chat endpoint.
//!
//! Outbound: `{ "text", "sender_id", "receiver_id" }`.
//! Inbound: `{ "id"?, "text", "sender_id", "receiver_id", "timestamp"? }`,
//! plus the control frames the backend interleaves (`{"type":"ping"}`
//! heartbeats and `{"error": ...}` notices).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::{parse_timestamp, Message, MessageStatus};
use crate::shared::error::ChatError;

/// Frame written by `send`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundFrame {
    pub text: String,
    pub sender_id: String,
    pub receiver_id: String,
}

impl OutboundFrame {
    /// Serialize to the JSON text frame
    pub fn encode(&self) -> Result<String, ChatError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Raw inbound record, lenient on every field
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFrame {
    #[serde(default, alias = "_id", deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub sender_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// A chat message as it arrives over the wire, before the store
/// assigns it an id or a timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: Option<String>,
    pub text: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub read: bool,
}

impl IncomingMessage {
    /// Complete the message for the store.
    ///
    /// A missing id is derived from the message content (see
    /// [`content_id`]), a missing timestamp becomes `received_at`, and a
    /// missing receiver is taken to be the local user.
    pub fn into_message(self, local_user_id: &str, received_at: DateTime<Utc>) -> Message {
        let status = if self.read {
            MessageStatus::Read
        } else {
            MessageStatus::Delivered
        };
        let receiver_id = self
            .receiver_id
            .unwrap_or_else(|| local_user_id.to_string());
        let id = match (self.id, self.timestamp) {
            (Some(id), _) => id,
            (None, Some(timestamp)) => content_id(&self.sender_id, &receiver_id, timestamp, &self.text),
            (None, None) => Uuid::new_v4().to_string(),
        };

        Message::new(
            id,
            self.sender_id,
            receiver_id,
            self.text,
            self.timestamp.unwrap_or(received_at),
            status,
        )
    }
}

/// Stable id for a record the server sent without one.
///
/// The same `(sender, receiver, timestamp, text)` always yields the same
/// id, so reloading history does not duplicate it. Records without a
/// timestamp cannot be told apart this way and get a random id.
pub fn content_id(sender_id: &str, receiver_id: &str, timestamp: DateTime<Utc>, text: &str) -> String {
    let key = format!(
        "{}\u{1f}{}\u{1f}{}\u{1f}{}",
        sender_id,
        receiver_id,
        timestamp.to_rfc3339(),
        text
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Keep-alive from the server
    Heartbeat,
    /// Server-side error notice
    ServerError(String),
    /// A chat message
    Message(IncomingMessage),
}

impl TryFrom<RawFrame> for IncomingMessage {
    type Error = ChatError;

    fn try_from(raw: RawFrame) -> Result<Self, Self::Error> {
        let text = raw
            .text
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ChatError::protocol("frame has no text"))?;
        let sender_id = raw
            .sender_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ChatError::protocol("frame has no sender_id"))?;

        Ok(Self {
            id: raw.id.filter(|id| !id.is_empty()),
            text,
            sender_id,
            receiver_id: raw.receiver_id.filter(|r| !r.is_empty()),
            timestamp: raw.timestamp.as_deref().and_then(parse_timestamp),
            read: raw.read.unwrap_or(false),
        })
    }
}

/// Parse and classify one inbound text frame
pub fn parse_frame(raw: &str) -> Result<InboundFrame, ChatError> {
    let frame: RawFrame = serde_json::from_str(raw)?;

    if frame.kind.as_deref() == Some("ping") {
        return Ok(InboundFrame::Heartbeat);
    }
    if let Some(error) = frame.error.as_ref() {
        let detail = match error {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Ok(InboundFrame::ServerError(detail));
    }

    IncomingMessage::try_from(frame).map(InboundFrame::Message)
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
