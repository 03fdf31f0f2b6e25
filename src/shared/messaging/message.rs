//! Chat Message Data Structure
//!
//! Represents a message in a two-party conversation together with its
//! advisory delivery status.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of client-generated ids for optimistic sends
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Delivery status of a message.
///
/// Status is UI state, not a protocol guarantee: `sent` and `delivered`
/// on optimistic messages are produced by timers, not acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Written locally, transport result pending
    Sending,
    /// Accepted by the transport
    Sent,
    /// Reached the counterpart
    Delivered,
    /// Seen by the receiver
    Read,
    /// Transport rejected the write; terminal
    Error,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Sending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Error => 0,
        }
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Progress is forward-only along `sending -> sent -> delivered -> read`;
    /// `error` can only be entered from `sending` and never left.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        match (self, next) {
            (MessageStatus::Error, _) => false,
            (_, MessageStatus::Error) => self == MessageStatus::Sending,
            _ => next.rank() > self.rank(),
        }
    }

    /// Terminal statuses accept no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Server id, or `temp-<millis>` for an unconfirmed optimistic send
    pub id: String,
    /// User who sent the message
    pub sender_id: String,
    /// User the message is addressed to
    pub receiver_id: String,
    /// Message content, non-empty after trim
    pub text: String,
    /// Server time for persisted messages, send time for optimistic ones
    pub timestamp: DateTime<Utc>,
    /// Advisory delivery status
    pub status: MessageStatus,
    /// Temporary id this entry was created under, kept after the server
    /// echo replaces `id`
    #[serde(skip)]
    pub client_id: Option<String>,
}

impl Message {
    /// Create a message with an explicit id and timestamp
    pub fn new(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
        status: MessageStatus,
    ) -> Self {
        Self {
            id: id.into(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            text: text.into(),
            timestamp,
            status,
            client_id: None,
        }
    }

    /// Create an optimistic message carrying a temporary id
    pub fn optimistic(
        temp_id: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        text: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        let temp_id = temp_id.into();
        Self {
            client_id: Some(temp_id.clone()),
            ..Self::new(
                temp_id,
                sender_id,
                receiver_id,
                text,
                sent_at,
                MessageStatus::Sending,
            )
        }
    }

    /// Whether the message still carries its client-generated id
    pub fn is_temporary(&self) -> bool {
        self.client_id.as_deref() == Some(self.id.as_str())
    }

    /// Whether `id` names this message, either its current or its temporary id
    pub fn answers_to(&self, id: &str) -> bool {
        self.id == id || self.client_id.as_deref() == Some(id)
    }

    /// The participant that is not `local_user_id`
    pub fn counterpart<'a>(&'a self, local_user_id: &str) -> &'a str {
        if self.sender_id == local_user_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    /// Whether the message belongs to the conversation between the two ids
    pub fn is_between(&self, local_user_id: &str, peer_id: &str) -> bool {
        (self.sender_id == local_user_id && self.receiver_id == peer_id)
            || (self.sender_id == peer_id && self.receiver_id == local_user_id)
    }

    /// Unread means addressed to `local_user_id` and not yet marked read
    pub fn is_unread_by(&self, local_user_id: &str) -> bool {
        self.receiver_id == local_user_id
            && self.sender_id != local_user_id
            && self.status != MessageStatus::Read
    }

    /// Get a preview of the message (first N characters)
    pub fn preview(&self, max_len: usize) -> String {
        if self.text.chars().count() <= max_len {
            self.text.clone()
        } else {
            let mut preview: String = self.text.chars().take(max_len.saturating_sub(3)).collect();
            preview.push_str("...");
            preview
        }
    }
}

/// Build a temporary id for an optimistic send
pub fn temp_id(sent_at: DateTime<Utc>) -> String {
    format!("{}{}", TEMP_ID_PREFIX, sent_at.timestamp_millis())
}

/// Parse an ISO-8601 instant.
///
/// Accepts RFC 3339 with an offset, and offset-less timestamps (as written
/// by `datetime.isoformat()` on the backend), which are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}
