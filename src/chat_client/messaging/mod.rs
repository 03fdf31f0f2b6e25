//! # Messaging
//!
//! Everything between the socket and the conversation store:
//!
//! - `channel.rs`: outbound encoding and inbound frame fan-out
//! - `listeners.rs`: typed listener registries with unsubscribe handles
//! - `history.rs`: persisted history over HTTP
//! - `simulated.rs`: local echo generator for simulated mode

pub mod channel;
pub mod history;
pub mod listeners;
pub mod simulated;

pub use channel::{FrameDisposition, MessageChannel};
pub use history::{HistoryLoad, HistoryLoader};
pub use listeners::{ListenerRegistry, Subscription};
pub use simulated::EchoSimulator;
