//! # Conversation Store
//!
//! Single source of truth for every conversation the session has seen:
//! persisted history, optimistic sends and live deliveries merged into one
//! ordered, de-duplicated view per counterpart.
//!
//! ## Architecture
//!
//! - **Reconciliation**: ordering, dedup and server-echo matching
//!   (`reconciliation.rs`)
//! - **Optimistic UI**: simulated `sent`/`delivered` timers
//!   (`optimistic.rs`)
//! - **Retry Logic**: reconnect backoff used by the connection manager
//!   (`retry.rs`)
//!
//! The store is only mutated through its own methods. Change notifications
//! are published as [`StoreEvent`]s after the internal lock is released,
//! so listeners may read the store from their callback.
//!
//! ## Usage
//!
//! ```rust
//! use chrono::Utc;
//! use medichat::chat_client::offline::ConversationStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = ConversationStore::new("u1");
//! let pending = store.append_optimistic("d1", "hello", Utc::now()).unwrap();
//! store.record_send_result("d1", &pending.id, true);
//! assert_eq!(store.conversation("d1").len(), 1);
//! # }
//! ```

pub mod optimistic;
pub mod reconciliation;
pub mod retry;

pub use optimistic::{OptimisticTimings, OptimisticTracker};
pub use reconciliation::{merge_messages, ConversationLog, Echo, MergeOutcome};
pub use retry::{BackoffStrategy, ReconnectBackoff, ReconnectPolicy};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::chat_client::messaging::listeners::{ListenerRegistry, Subscription};
use crate::shared::messaging::{temp_id, IncomingMessage, Message, MessageStatus};

/// Change published by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A history batch was merged
    HistoryMerged { peer_id: String, added: usize },
    /// A new entry (optimistic or live)
    MessageAdded { peer_id: String, message_id: String },
    /// A server echo took over an optimistic entry
    MessageReconciled {
        peer_id: String,
        temp_id: String,
        message_id: String,
    },
    /// An entry changed status
    StatusChanged {
        peer_id: String,
        message_id: String,
        status: MessageStatus,
    },
}

impl StoreEvent {
    pub fn peer_id(&self) -> &str {
        match self {
            StoreEvent::HistoryMerged { peer_id, .. }
            | StoreEvent::MessageAdded { peer_id, .. }
            | StoreEvent::MessageReconciled { peer_id, .. }
            | StoreEvent::StatusChanged { peer_id, .. } => peer_id,
        }
    }
}

/// One row of the conversation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub peer_id: String,
    pub last_message: Option<Message>,
    pub unread: usize,
}

struct StoreInner {
    conversations: HashMap<String, ConversationLog>,
    tracker: OptimisticTracker,
}

/// Shared handle to the merged conversations of one signed-in user
#[derive(Clone)]
pub struct ConversationStore {
    local_user_id: Arc<str>,
    inner: Arc<Mutex<StoreInner>>,
    events: ListenerRegistry<StoreEvent>,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("local_user_id", &self.local_user_id)
            .field("conversations", &self.lock().conversations.len())
            .finish()
    }
}

impl ConversationStore {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self::with_timings(local_user_id, OptimisticTimings::default())
    }

    pub fn with_timings(local_user_id: impl Into<String>, timings: OptimisticTimings) -> Self {
        let local_user_id: String = local_user_id.into();
        Self {
            local_user_id: Arc::from(local_user_id),
            inner: Arc::new(Mutex::new(StoreInner {
                conversations: HashMap::new(),
                tracker: OptimisticTracker::new(timings),
            })),
            events: ListenerRegistry::new(),
        }
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// Subscribe to store changes
    pub fn on_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    /// Merge a history batch for `peer_id`. The batch must already be in
    /// chronological order; ids already present are skipped.
    pub fn seed_history(&self, peer_id: &str, messages: Vec<Message>) -> usize {
        let added = {
            let mut inner = self.lock();
            inner
                .conversations
                .entry(peer_id.to_string())
                .or_default()
                .merge_history(messages)
        };

        info!(peer_id, added, "Merged conversation history");
        self.events.emit(&StoreEvent::HistoryMerged {
            peer_id: peer_id.to_string(),
            added,
        });
        added
    }

    /// Merge a live delivery.
    ///
    /// Messages that do not involve the local user are ignored and yield
    /// `None`. A message the local user sent is first matched against the
    /// pending optimistic entries.
    pub fn apply_incoming(
        &self,
        incoming: IncomingMessage,
        received_at: DateTime<Utc>,
    ) -> Option<MergeOutcome> {
        let local = self.local_user_id();
        let receiver_id = incoming
            .receiver_id
            .clone()
            .unwrap_or_else(|| local.to_string());

        if incoming.sender_id != local && receiver_id != local {
            debug!(
                sender_id = %incoming.sender_id,
                receiver_id = %receiver_id,
                "Ignoring message for another user"
            );
            return None;
        }

        let peer_id = if incoming.sender_id == local {
            receiver_id.clone()
        } else {
            incoming.sender_id.clone()
        };

        let outcome = {
            let mut inner = self.lock();
            let log = inner.conversations.entry(peer_id.clone()).or_default();

            let reconciled = if incoming.sender_id == local {
                log.reconcile_echo(Echo {
                    sender_id: &incoming.sender_id,
                    receiver_id: &receiver_id,
                    text: &incoming.text,
                    server_id: incoming.id.as_deref(),
                    timestamp: incoming.timestamp.unwrap_or(received_at),
                })
            } else {
                None
            };

            match reconciled {
                Some(outcome) => outcome,
                None => log.merge_live(incoming.into_message(local, received_at)),
            }
        };

        match &outcome {
            MergeOutcome::Inserted { id } => {
                debug!(peer_id = %peer_id, message_id = %id, "Live message added");
                self.events.emit(&StoreEvent::MessageAdded {
                    peer_id,
                    message_id: id.clone(),
                });
            }
            MergeOutcome::Reconciled { temp_id, id } => {
                debug!(peer_id = %peer_id, temp_id = %temp_id, message_id = %id, "Server echo reconciled");
                self.events.emit(&StoreEvent::MessageReconciled {
                    peer_id,
                    temp_id: temp_id.clone(),
                    message_id: id.clone(),
                });
            }
            MergeOutcome::Duplicate { id } => {
                debug!(peer_id = %peer_id, message_id = %id, "Duplicate message ignored");
            }
        }
        Some(outcome)
    }

    /// Append a `sending` entry for text the local user is about to send.
    ///
    /// Returns `None` for blank text.
    pub fn append_optimistic(
        &self,
        peer_id: &str,
        text: &str,
        sent_at: DateTime<Utc>,
    ) -> Option<Message> {
        if text.trim().is_empty() {
            return None;
        }

        let message = {
            let mut inner = self.lock();
            let log = inner.conversations.entry(peer_id.to_string()).or_default();

            let base = temp_id(sent_at);
            let mut id = base.clone();
            let mut n = 1;
            while log.contains(&id) {
                id = format!("{}-{}", base, n);
                n += 1;
            }

            let message = Message::optimistic(id, self.local_user_id(), peer_id, text, sent_at);
            log.insert_sorted(message.clone());
            message
        };

        self.events.emit(&StoreEvent::MessageAdded {
            peer_id: peer_id.to_string(),
            message_id: message.id.clone(),
        });
        Some(message)
    }

    /// Record whether the transport took an optimistic message.
    ///
    /// Accepted messages start the simulated `sent`/`delivered` timers;
    /// rejected ones move to `error` and keep their temporary id.
    pub fn record_send_result(&self, peer_id: &str, message_id: &str, accepted: bool) {
        if !accepted {
            self.set_status(peer_id, message_id, MessageStatus::Error);
            return;
        }

        let store = self.clone();
        let peer = peer_id.to_string();
        let id = message_id.to_string();
        self.lock().tracker.track(peer_id, message_id, move |status| {
            store.set_status(&peer, &id, status);
        });
    }

    /// Apply a legal status transition; returns whether it was applied
    pub fn set_status(&self, peer_id: &str, message_id: &str, status: MessageStatus) -> bool {
        let applied = self
            .lock()
            .conversations
            .get_mut(peer_id)
            .and_then(|log| log.set_status(message_id, status));

        match applied {
            Some(current_id) => {
                self.events.emit(&StoreEvent::StatusChanged {
                    peer_id: peer_id.to_string(),
                    message_id: current_id,
                    status,
                });
                true
            }
            None => false,
        }
    }

    /// Mark one message as read; idempotent
    pub fn mark_read(&self, peer_id: &str, message_id: &str) -> bool {
        let (marked, current_id) = {
            let mut inner = self.lock();
            match inner.conversations.get_mut(peer_id) {
                Some(log) => {
                    let marked = log.mark_read(message_id, &self.local_user_id);
                    (marked, log.get(message_id).map(|m| m.id.clone()))
                }
                None => (false, None),
            }
        };

        if let (true, Some(message_id)) = (marked, current_id) {
            self.events.emit(&StoreEvent::StatusChanged {
                peer_id: peer_id.to_string(),
                message_id,
                status: MessageStatus::Read,
            });
        }
        marked
    }

    /// Mark every unread message of a conversation as read
    pub fn mark_all_read(&self, peer_id: &str) -> usize {
        let marked: Vec<String> = {
            let mut inner = self.lock();
            match inner.conversations.get_mut(peer_id) {
                Some(log) => {
                    let unread: Vec<String> = log
                        .messages()
                        .iter()
                        .filter(|m| m.is_unread_by(&self.local_user_id))
                        .map(|m| m.id.clone())
                        .collect();
                    log.mark_all_read(&self.local_user_id);
                    unread
                }
                None => Vec::new(),
            }
        };

        for message_id in &marked {
            self.events.emit(&StoreEvent::StatusChanged {
                peer_id: peer_id.to_string(),
                message_id: message_id.clone(),
                status: MessageStatus::Read,
            });
        }
        marked.len()
    }

    /// Merged view of one conversation, oldest first
    pub fn conversation(&self, peer_id: &str) -> Vec<Message> {
        self.lock()
            .conversations
            .get(peer_id)
            .map(|log| log.messages().to_vec())
            .unwrap_or_default()
    }

    pub fn message(&self, peer_id: &str, message_id: &str) -> Option<Message> {
        self.lock()
            .conversations
            .get(peer_id)
            .and_then(|log| log.get(message_id).cloned())
    }

    pub fn unread_count(&self, peer_id: &str) -> usize {
        self.lock()
            .conversations
            .get(peer_id)
            .map(|log| log.unread_count(&self.local_user_id))
            .unwrap_or(0)
    }

    pub fn total_unread(&self) -> usize {
        self.lock()
            .conversations
            .values()
            .map(|log| log.unread_count(&self.local_user_id))
            .sum()
    }

    /// Conversations with at least one message, most recent activity first
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        let inner = self.lock();
        let mut summaries: Vec<ConversationSummary> = inner
            .conversations
            .iter()
            .filter(|(_, log)| !log.is_empty())
            .map(|(peer_id, log)| ConversationSummary {
                peer_id: peer_id.clone(),
                last_message: log.last().cloned(),
                unread: log.unread_count(&self.local_user_id),
            })
            .collect();

        summaries.sort_by(|a, b| {
            let a_time = a.last_message.as_ref().map(|m| m.timestamp);
            let b_time = b.last_message.as_ref().map(|m| m.timestamp);
            b_time.cmp(&a_time).then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        summaries
    }

    /// Optimistic timers still pending for a conversation
    pub fn pending_timers(&self, peer_id: &str) -> usize {
        self.lock().tracker.pending(peer_id)
    }

    /// Abort the optimistic timers of a conversation; its messages stay
    pub fn cancel_pending(&self, peer_id: &str) -> usize {
        let cancelled = self.lock().tracker.cancel(peer_id);
        if cancelled > 0 {
            debug!(peer_id, cancelled, "Cancelled optimistic timers");
        }
        cancelled
    }

    /// Abort every timer and forget every conversation
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.tracker.cancel_all();
        inner.conversations.clear();
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
