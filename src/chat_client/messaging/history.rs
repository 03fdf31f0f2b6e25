//! History Loader
//!
//! Fetches persisted messages of a conversation over HTTP.
//!
//! The backend answers newest-first. [`HistoryLoader::fetch`] returns that
//! server order; [`HistoryLoader::get_chat_history`] reverses it to
//! chronological order and never fails, because a missing history must not
//! keep the live connection from opening.
//!
//! In simulated mode no request is made. The result is empty unless demo
//! history was switched on with [`HistoryLoader::with_demo_history`].

use chrono::Utc;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::chat_client::messaging::simulated::demo_history;
use crate::chat_client::sync::presence::FallbackMode;
use crate::shared::config::ClientConfig;
use crate::shared::error::ChatError;
use crate::shared::messaging::{IncomingMessage, Message, RawFrame};

/// Result of a history load: possibly empty messages plus the error that
/// emptied them, if any
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryLoad {
    /// Chronological, oldest first
    pub messages: Vec<Message>,
    pub error: Option<ChatError>,
}

impl HistoryLoad {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// HTTP client for `/chat/history/{peer}_{user}`
#[derive(Debug, Clone)]
pub struct HistoryLoader {
    client: Client,
    config: ClientConfig,
    fallback: Option<FallbackMode>,
    demo_history: bool,
}

impl HistoryLoader {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            fallback: None,
            demo_history: false,
        }
    }

    /// Skip the request while the given fallback flag is set
    pub fn with_fallback(mut self, fallback: FallbackMode) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Serve a canned exchange while simulated
    pub fn with_demo_history(mut self, enabled: bool) -> Self {
        self.demo_history = enabled;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn is_simulated(&self) -> bool {
        self.config.simulated || self.fallback.as_ref().is_some_and(FallbackMode::is_enabled)
    }

    /// Fetch history in server order (newest first).
    ///
    /// Records that are not valid messages are skipped.
    pub async fn fetch(&self, peer_id: &str, local_user_id: &str) -> Result<Vec<Message>, ChatError> {
        let token = self
            .config
            .auth_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ChatError::history_fetch("auth token is required to load history"))?;

        let url = self.config.history_url(peer_id, local_user_id);
        debug!(peer_id, limit = self.config.history_limit, "Fetching chat history");

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChatError::history_fetch(format!(
                "server returned {}: {}",
                status,
                error_text.trim()
            )));
        }

        let records: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| ChatError::history_fetch(format!("Failed to parse response: {}", e)))?;

        let received_at = Utc::now();
        let messages = records
            .into_iter()
            .enumerate()
            .filter_map(|(index, record)| {
                let parsed = serde_json::from_value::<RawFrame>(record)
                    .map_err(ChatError::from)
                    .and_then(IncomingMessage::try_from);
                match parsed {
                    Ok(incoming) => Some(incoming.into_message(local_user_id, received_at)),
                    Err(e) => {
                        warn!(index, error = %e, "Skipping invalid history record");
                        None
                    }
                }
            })
            .collect();

        Ok(messages)
    }

    /// Chronological history for the conversation between `local_user_id`
    /// and `peer_id`. Failures produce an empty list plus the error.
    pub async fn get_chat_history(&self, peer_id: &str, local_user_id: &str) -> HistoryLoad {
        if self.is_simulated() {
            if self.demo_history {
                debug!(peer_id, "Simulated mode, serving demo history");
                return HistoryLoad {
                    messages: demo_history(local_user_id, peer_id, Utc::now()),
                    error: None,
                };
            }
            debug!(peer_id, "Simulated mode, no history requested");
            return HistoryLoad::default();
        }

        match self.fetch(peer_id, local_user_id).await {
            Ok(mut messages) => {
                messages.reverse();
                info!(peer_id, count = messages.len(), "Loaded chat history");
                HistoryLoad {
                    messages,
                    error: None,
                }
            }
            Err(e) => {
                warn!(peer_id, error = %e, "Failed to load chat history");
                HistoryLoad {
                    messages: Vec::new(),
                    error: Some(e),
                }
            }
        }
    }
}
