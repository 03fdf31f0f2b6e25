//! Messaging Module
//!
//! Data structures for the conversation layer:
//!
//! - `Message` - a message with its advisory delivery status
//! - `OutboundFrame` / `InboundFrame` - the JSON frames on the socket
//!
//! # Usage
//!
//! ```rust
//! use medichat::shared::messaging::{parse_frame, InboundFrame};
//!
//! let frame = parse_frame(r#"{"type":"ping"}"#).unwrap();
//! assert_eq!(frame, InboundFrame::Heartbeat);
//! ```

pub mod frame;
pub mod message;

pub use frame::{content_id, parse_frame, InboundFrame, IncomingMessage, OutboundFrame, RawFrame};
pub use message::{parse_timestamp, temp_id, Message, MessageStatus, TEMP_ID_PREFIX};
