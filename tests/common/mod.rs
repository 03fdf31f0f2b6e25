//! Common test utilities and helpers
//!
//! - Scripted in-memory socket connector
//! - Configuration and history-server fixtures
//! - Listener recorders

pub mod scripted_connector;

pub use fixtures::*;
pub use scripted_connector::*;
