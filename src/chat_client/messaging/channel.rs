//! Message channel: wire encoding of outgoing text and fan-out of inbound
//! frames to the registered listeners.
//!
//! The channel never holds the socket itself. The connection manager
//! writes the encoded frame and feeds raw inbound text to
//! [`MessageChannel::dispatch_frame`].

use tracing::{debug, warn};

use super::listeners::{ListenerRegistry, Subscription};
use crate::shared::error::ChatError;
use crate::shared::messaging::{parse_frame, InboundFrame, IncomingMessage, OutboundFrame};

/// What became of one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Chat message handed to the listeners
    Delivered,
    /// Server keep-alive
    Heartbeat,
    /// Server error notice, logged and dropped
    ServerError,
    /// Malformed frame, logged and dropped
    Dropped,
}

/// Listener registries for inbound messages and connection changes
#[derive(Debug, Clone, Default)]
pub struct MessageChannel {
    messages: ListenerRegistry<IncomingMessage>,
    connection: ListenerRegistry<bool>,
}

impl MessageChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for inbound chat messages
    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&IncomingMessage) + Send + Sync + 'static,
    {
        self.messages.subscribe(callback)
    }

    /// Register a callback for connection up (`true`) / down (`false`)
    pub fn on_connection_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.connection.subscribe(callback)
    }

    pub fn message_listeners(&self) -> usize {
        self.messages.len()
    }

    pub fn connection_listeners(&self) -> usize {
        self.connection.len()
    }

    /// Encode `{text, sender_id, receiver_id}` for the socket
    pub fn encode(text: &str, sender_id: &str, receiver_id: &str) -> Result<String, ChatError> {
        OutboundFrame {
            text: text.to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
        }
        .encode()
    }

    /// Parse one inbound text frame and hand chat messages to the
    /// listeners. Nothing here fails: bad frames are logged and dropped.
    pub fn dispatch_frame(&self, raw: &str) -> FrameDisposition {
        match parse_frame(raw) {
            Ok(InboundFrame::Message(message)) => {
                debug!(sender_id = %message.sender_id, "Inbound message");
                self.deliver(message);
                FrameDisposition::Delivered
            }
            Ok(InboundFrame::Heartbeat) => {
                debug!("Heartbeat frame");
                FrameDisposition::Heartbeat
            }
            Ok(InboundFrame::ServerError(detail)) => {
                warn!(error = %detail, "Server sent an error frame");
                FrameDisposition::ServerError
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                FrameDisposition::Dropped
            }
        }
    }

    pub fn deliver(&self, message: IncomingMessage) {
        self.messages.emit(&message);
    }

    pub fn notify_connection(&self, connected: bool) {
        self.connection.emit(&connected);
    }
}
