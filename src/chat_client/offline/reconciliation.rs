//! # Conversation Reconciliation
//!
//! Merges persisted history, optimistic sends and live deliveries into one
//! ordered log per conversation.
//!
//! ## Features
//!
//! - **Deduplication**: a message id (current or temporary) is stored once
//! - **Total Order**: entries are kept sorted by timestamp; equal timestamps
//!   keep arrival order
//! - **Echo Reconciliation**: the server copy of an optimistic send takes
//!   over the temporary entry instead of appearing twice
//!
//! ## Usage
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use medichat::chat_client::offline::reconciliation::merge_messages;
//! use medichat::shared::messaging::{Message, MessageStatus};
//!
//! let t = |s| Utc.timestamp_opt(s, 0).unwrap();
//! let history = vec![Message::new("m1", "u2", "u1", "hi", t(10), MessageStatus::Read)];
//! let live = vec![
//!     Message::new("m2", "u2", "u1", "earlier", t(5), MessageStatus::Delivered),
//!     Message::new("m1", "u2", "u1", "hi", t(10), MessageStatus::Delivered),
//! ];
//!
//! let merged = merge_messages(&history, &live);
//! let ids: Vec<_> = merged.iter().map(|m| m.id.as_str()).collect();
//! assert_eq!(ids, ["m2", "m1"]);
//! ```

use chrono::{DateTime, Utc};

use crate::shared::messaging::{Message, MessageStatus};

/// Result of offering a live message to a [`ConversationLog`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New entry
    Inserted { id: String },
    /// Server echo of an optimistic send; the entry formerly under
    /// `temp_id` is now `id`
    Reconciled { temp_id: String, id: String },
    /// Id already present, message ignored
    Duplicate { id: String },
}

/// Server copy of a message the local user sent
#[derive(Debug, Clone, Copy)]
pub struct Echo<'a> {
    pub sender_id: &'a str,
    pub receiver_id: &'a str,
    pub text: &'a str,
    /// Id assigned by the server, if the frame carried one
    pub server_id: Option<&'a str>,
    pub timestamp: DateTime<Utc>,
}

/// Ordered, de-duplicated messages of one conversation
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether `id` names an entry, by current or temporary id
    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.answers_to(id))
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.answers_to(id))
    }

    /// Merge a chronological history batch; returns how many were new
    pub fn merge_history(&mut self, batch: impl IntoIterator<Item = Message>) -> usize {
        let mut added = 0;
        for message in batch {
            if self.contains(&message.id) {
                continue;
            }
            self.insert_sorted(message);
            added += 1;
        }
        added
    }

    /// Merge a live message unless its id is already present
    pub fn merge_live(&mut self, message: Message) -> MergeOutcome {
        if self.contains(&message.id) {
            return MergeOutcome::Duplicate { id: message.id };
        }
        let id = message.id.clone();
        self.insert_sorted(message);
        MergeOutcome::Inserted { id }
    }

    /// Let a server echo take over the oldest matching optimistic entry.
    ///
    /// The entry keeps its temporary id as `client_id`; its id is replaced
    /// only when the server supplied one. Returns `None` when no temporary
    /// entry matches.
    pub fn reconcile_echo(&mut self, echo: Echo<'_>) -> Option<MergeOutcome> {
        if let Some(server_id) = echo.server_id {
            if self.contains(server_id) {
                return None;
            }
        }

        let index = self.messages.iter().position(|m| {
            m.is_temporary()
                && m.status != MessageStatus::Error
                && m.sender_id == echo.sender_id
                && m.receiver_id == echo.receiver_id
                && m.text == echo.text
        })?;

        let mut entry = self.messages.remove(index);
        let temp_id = entry.id.clone();
        if let Some(server_id) = echo.server_id {
            entry.id = server_id.to_string();
        }
        entry.timestamp = echo.timestamp;
        if entry.status.can_transition_to(MessageStatus::Sent) {
            entry.status = MessageStatus::Sent;
        }

        let id = entry.id.clone();
        self.insert_sorted(entry);
        Some(MergeOutcome::Reconciled { temp_id, id })
    }

    /// Apply a status transition if it is legal. Returns the entry's
    /// current id on success.
    pub fn set_status(&mut self, id: &str, status: MessageStatus) -> Option<String> {
        let message = self.messages.iter_mut().find(|m| m.answers_to(id))?;
        if !message.status.can_transition_to(status) {
            return None;
        }
        message.status = status;
        Some(message.id.clone())
    }

    /// Mark one message addressed to `local_user_id` as read
    pub fn mark_read(&mut self, id: &str, local_user_id: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.answers_to(id)) {
            Some(message) if message.is_unread_by(local_user_id) => {
                message.status = MessageStatus::Read;
                true
            }
            _ => false,
        }
    }

    /// Mark every unread message addressed to `local_user_id` as read
    pub fn mark_all_read(&mut self, local_user_id: &str) -> usize {
        let mut marked = 0;
        for message in self
            .messages
            .iter_mut()
            .filter(|m| m.is_unread_by(local_user_id))
        {
            message.status = MessageStatus::Read;
            marked += 1;
        }
        marked
    }

    pub fn unread_count(&self, local_user_id: &str) -> usize {
        self.messages
            .iter()
            .filter(|m| m.is_unread_by(local_user_id))
            .count()
    }

    /// Insert after every entry with an equal or earlier timestamp
    pub fn insert_sorted(&mut self, message: Message) {
        let index = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(index, message);
    }
}

/// Merge history and live messages into one de-duplicated, time-ordered
/// sequence. History wins when both carry the same id.
pub fn merge_messages(history: &[Message], live: &[Message]) -> Vec<Message> {
    let mut log = ConversationLog::new();
    log.merge_history(history.iter().cloned());
    for message in live {
        log.merge_live(message.clone());
    }
    log.messages
}
