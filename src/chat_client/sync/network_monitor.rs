//! # Network Monitor
//!
//! Publishes host connectivity changes to the connection layer.
//!
//! ## Features
//!
//! - **Connectivity Detection**: online/offline status as a `watch` value
//! - **Scoped Subscription**: each receiver is released when its owner drops
//! - **Platform Hook**: whatever observes the host network calls
//!   [`NetworkMonitor::set_status`]

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkStatus {
    #[default]
    Online,
    Offline,
}

impl NetworkStatus {
    pub fn is_online(self) -> bool {
        self == NetworkStatus::Online
    }
}

/// Source of online/offline signals.
///
/// Cloning yields another handle to the same status.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    status: Arc<watch::Sender<NetworkStatus>>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkStatus::Online)
    }
}

impl NetworkMonitor {
    pub fn new(initial: NetworkStatus) -> Self {
        let (status, _) = watch::channel(initial);
        Self {
            status: Arc::new(status),
        }
    }

    pub fn get_status(&self) -> NetworkStatus {
        *self.status.borrow()
    }

    /// Record a connectivity change; repeated values are not re-published
    pub fn set_status(&self, next: NetworkStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!(status = ?next, "Network status changed");
        }
    }

    pub fn go_online(&self) {
        self.set_status(NetworkStatus::Online);
    }

    pub fn go_offline(&self) {
        self.set_status(NetworkStatus::Offline);
    }

    /// Receiver that observes subsequent changes
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.status.subscribe()
    }

    /// Number of live receivers
    pub fn subscriber_count(&self) -> usize {
        self.status.receiver_count()
    }
}
