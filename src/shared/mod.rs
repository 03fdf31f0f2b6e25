//! Shared Module
//!
//! Platform-agnostic types used by the chat client: messages and their
//! wire frames, errors and configuration. Nothing in here performs I/O
//! except the configuration loaders.

/// Shared error types
pub mod error;

/// Client configuration
pub mod config;

/// Messages and wire frames
pub mod messaging;

pub use config::{ClientConfig, ClientConfigBuilder, ConfigError};
pub use error::ChatError;
pub use messaging::{Message, MessageStatus};
