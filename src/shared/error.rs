//! Shared Error Types
//!
//! This module defines the error taxonomy of the messaging core. Only
//! [`ChatError::Configuration`] ever crosses the public API as an `Err`;
//! every other category is converted into a state transition, a `false`
//! return or an empty result at the component boundary.
//!
//! # Error Categories
//!
//! - `Configuration` - missing auth token or user id before connect
//! - `Transport` - socket-level failure, recovered by the close/reconnect path
//! - `Protocol` - malformed inbound frame, dropped locally
//! - `Delivery` - send attempted while not connected
//! - `HistoryFetch` - persisted history could not be loaded
//!
//! # Usage
//!
//! ```rust
//! use medichat::shared::error::ChatError;
//!
//! let error = ChatError::configuration("auth token is required");
//! assert!(error.is_fatal());
//! ```
use thiserror::Error;

use crate::shared::config::ConfigError;

/// Failures produced by the messaging core
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Connect attempted without the required credentials
    #[error("Configuration error: {message}")]
    Configuration {
        /// Human-readable error message
        message: String,
    },

    /// Socket-level error event
    #[error("Transport error: {message}")]
    Transport {
        /// Human-readable error message
        message: String,
    },

    /// Inbound frame could not be interpreted
    #[error("Protocol error: {message}")]
    Protocol {
        /// Human-readable error message
        message: String,
    },

    /// Outgoing message could not be written
    #[error("Delivery error: {message}")]
    Delivery {
        /// Human-readable error message
        message: String,
    },

    /// Persisted history could not be loaded
    #[error("History fetch error: {message}")]
    HistoryFetch {
        /// Human-readable error message
        message: String,
    },
}

impl ChatError {
    /// Create a new configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a new delivery error
    pub fn delivery(message: impl Into<String>) -> Self {
        Self::Delivery {
            message: message.into(),
        }
    }

    /// Create a new history fetch error
    pub fn history_fetch(message: impl Into<String>) -> Self {
        Self::HistoryFetch {
            message: message.into(),
        }
    }

    /// Whether the error ends the operation that raised it with no retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::protocol(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::history_fetch(format!("server returned {}", status)),
            None => Self::history_fetch(format!("request failed: {}", err)),
        }
    }
}

impl From<ConfigError> for ChatError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}
