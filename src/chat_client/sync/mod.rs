//! # Backend Reachability
//!
//! Host connectivity signals and the presence probe that decides whether
//! the client runs against the backend or in simulated mode.

pub mod network_monitor;
pub mod presence;

pub use network_monitor::{NetworkMonitor, NetworkStatus};
pub use presence::{FallbackMode, PresenceProbe};
