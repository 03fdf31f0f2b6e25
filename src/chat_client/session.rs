//! Chat session: the one entry point the UI layer talks to.
//!
//! Opening a conversation tears down the previous one, loads history,
//! connects, and routes live messages into the [`ConversationStore`].
//! Sends are reflected optimistically before the transport answers.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::chat_client::connection::{
    ConnectionManager, ConnectionOptions, ConnectionState, Connector, Notice,
};
use crate::chat_client::messaging::{HistoryLoader, Subscription};
use crate::chat_client::offline::{ConversationStore, ConversationSummary, StoreEvent};
use crate::shared::config::ClientConfig;
use crate::shared::error::ChatError;
use crate::shared::messaging::Message;

/// Outcome of [`ChatSession::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Temporary id of the optimistic entry
    pub id: String,
    /// Whether the transport took the message
    pub accepted: bool,
}

#[derive(Debug)]
struct ActiveConversation {
    peer_id: String,
    _messages: Subscription,
}

/// A signed-in user's chat, one open conversation at a time
#[derive(Debug)]
pub struct ChatSession {
    config: ClientConfig,
    manager: ConnectionManager,
    history: HistoryLoader,
    store: ConversationStore,
    active: Option<ActiveConversation>,
}

impl ChatSession {
    /// Build a session. The auth token and local user id must be set.
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self, ChatError> {
        Self::with_options(config, connector, ConnectionOptions::default())
    }

    pub fn with_options(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        options: ConnectionOptions,
    ) -> Result<Self, ChatError> {
        let local_user_id = config.credentials()?.local_user_id.to_string();
        let history = HistoryLoader::new(config.clone()).with_fallback(options.fallback.clone());
        let manager = ConnectionManager::with_options(config.clone(), connector, options);

        Ok(Self {
            store: ConversationStore::new(local_user_id),
            config,
            manager,
            history,
            active: None,
        })
    }

    /// Show a canned exchange when a conversation opens in simulated mode
    pub fn with_demo_history(mut self, enabled: bool) -> Self {
        self.history = self.history.with_demo_history(enabled);
        self
    }

    /// Switch to the conversation with `peer_id` and return its merged view.
    ///
    /// History failures are reported as a notice and leave the
    /// conversation empty; only a configuration failure is returned.
    pub async fn open_conversation(&mut self, peer_id: &str) -> Result<Vec<Message>, ChatError> {
        self.close_conversation().await;

        let local_user_id = self.store.local_user_id().to_string();
        info!(peer_id, "Opening conversation");
        self.manager.reconfigure(self.config.with_peer(peer_id)).await;

        let store = self.store.clone();
        let subscription = self.manager.on_message(move |incoming| {
            store.apply_incoming(incoming.clone(), Utc::now());
        });
        self.active = Some(ActiveConversation {
            peer_id: peer_id.to_string(),
            _messages: subscription,
        });

        let load = self.history.get_chat_history(peer_id, &local_user_id).await;
        if let Some(error) = &load.error {
            self.manager
                .notify(Notice::warning(format!("Could not load chat history: {}", error)));
        }
        self.store.seed_history(peer_id, load.messages);

        self.manager.connect().await?;
        Ok(self.store.conversation(peer_id))
    }

    /// Send `text` to the active conversation.
    ///
    /// Returns `None` when no conversation is open or the text is blank.
    pub fn send(&self, text: &str) -> Option<SendReceipt> {
        let peer_id = self.active_peer()?;
        let message = self.store.append_optimistic(peer_id, text, Utc::now())?;
        let accepted = self.manager.send(text, peer_id);
        self.store.record_send_result(peer_id, &message.id, accepted);

        Some(SendReceipt {
            id: message.id,
            accepted,
        })
    }

    /// Disconnect, cancel the conversation's timers and stop routing its
    /// messages. The messages stay in the store.
    pub async fn close_conversation(&mut self) {
        if let Some(active) = self.active.take() {
            info!(peer_id = %active.peer_id, "Closing conversation");
            self.store.cancel_pending(&active.peer_id);
            self.manager.disconnect().await;
        }
    }

    /// Close everything and stop the connection task
    pub async fn shutdown(mut self) {
        self.close_conversation().await;
        self.store.clear();
        let ChatSession { manager, .. } = self;
        manager.dispose().await;
    }

    pub fn active_peer(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.peer_id.as_str())
    }

    /// Merged view of the active conversation
    pub fn conversation(&self) -> Vec<Message> {
        self.active_peer()
            .map(|peer_id| self.store.conversation(peer_id))
            .unwrap_or_default()
    }

    pub fn mark_read(&self, message_id: &str) -> bool {
        self.active_peer()
            .is_some_and(|peer_id| self.store.mark_read(peer_id, message_id))
    }

    pub fn mark_all_read(&self) -> usize {
        self.active_peer()
            .map(|peer_id| self.store.mark_all_read(peer_id))
            .unwrap_or(0)
    }

    pub fn unread_count(&self) -> usize {
        self.store.total_unread()
    }

    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.store.summaries()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn on_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.store.on_update(callback)
    }

    pub fn on_notice<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Notice) + Send + Sync + 'static,
    {
        self.manager.on_notice(callback)
    }

    pub fn on_connection_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.manager.on_connection_change(callback)
    }
}
