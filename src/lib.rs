//! MediChat - real-time messaging core
//!
//! The transport layer of a patient/doctor chat: a reconnecting WebSocket
//! client, its connection-state machine, message delivery tracking, and
//! the reconciliation of optimistic sends with server history.
//!
//! # Module Structure
//!
//! - **`shared`** - types with no runtime attached
//!   - Messages, wire frames, status transitions
//!   - Client configuration (environment and TOML)
//!   - Error types
//!
//! - **`chat_client`** - the runtime
//!   - `ConnectionManager` with exponential-backoff reconnection
//!   - `MessageChannel` and the listener registries
//!   - `HistoryLoader` for persisted messages
//!   - `ConversationStore` merging history, optimistic and live messages
//!   - `PresenceProbe` deciding when to fall back to simulated mode
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use medichat::chat_client::connection::TungsteniteConnector;
//! use medichat::chat_client::ChatSession;
//! use medichat::shared::ClientConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let mut session = ChatSession::new(config, Arc::new(TungsteniteConnector))?;
//! let history = session.open_conversation("doctor-7").await?;
//! println!("{} messages", history.len());
//! session.send("Hello doctor");
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod chat_client;
pub mod shared;
