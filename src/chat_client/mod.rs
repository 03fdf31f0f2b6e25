//! # Chat Client
//!
//! Runtime side of the messaging core.
//!
//! ## Module Structure
//!
//! - **`connection`** - socket ownership, reconnect backoff, simulated mode
//! - **`messaging`** - frame fan-out, listener registries, history loading
//! - **`offline`** - conversation store, optimistic status, retry policy
//! - **`sync`** - online/offline signals and the presence probe
//! - **`session`** - the facade the UI layer drives

pub mod connection;
pub mod messaging;
pub mod offline;
pub mod session;
pub mod sync;

pub use connection::{ConnectionManager, ConnectionOptions, ConnectionState, Notice};
pub use offline::ConversationStore;
pub use session::{ChatSession, SendReceipt};
