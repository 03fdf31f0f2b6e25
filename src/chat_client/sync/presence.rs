//! # Presence Probe
//!
//! Periodic reachability check of the backend root and the process-wide
//! fallback flag it drives.
//!
//! ## Features
//!
//! - **Interval Probe**: unauthenticated `GET /` every 30 seconds
//! - **Fallback Mode**: an unreachable backend switches the connection layer
//!   to its local echo generator; a reachable one switches it back
//! - **Manual Recheck**: [`PresenceProbe::recheck`] runs one probe now
//!
//! ## Usage
//!
//! ```rust,no_run
//! use medichat::chat_client::sync::{FallbackMode, PresenceProbe};
//! use medichat::shared::config::ClientConfig;
//!
//! # async fn run() {
//! let fallback = FallbackMode::default();
//! let probe = PresenceProbe::new(&ClientConfig::default(), fallback.clone());
//! probe.start();
//! let reachable = probe.recheck().await;
//! assert_eq!(fallback.is_enabled(), !reachable);
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::chat_client::messaging::listeners::{ListenerRegistry, Subscription};
use crate::shared::config::ClientConfig;

/// Time between probes
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound for a single probe request
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared "backend unreachable, simulate locally" flag
#[derive(Debug, Clone)]
pub struct FallbackMode {
    state: Arc<watch::Sender<bool>>,
    listeners: ListenerRegistry<bool>,
}

impl Default for FallbackMode {
    fn default() -> Self {
        Self::new(false)
    }
}

impl FallbackMode {
    pub fn new(enabled: bool) -> Self {
        let (state, _) = watch::channel(enabled);
        Self {
            state: Arc::new(state),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self.state.borrow()
    }

    /// Update the flag. Listeners only hear about actual changes.
    ///
    /// Returns whether the value changed.
    pub fn set(&self, enabled: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == enabled {
                false
            } else {
                *current = enabled;
                true
            }
        });

        if changed {
            if enabled {
                warn!("Backend unreachable, switching to simulated mode");
            } else {
                info!("Backend reachable, leaving simulated mode");
            }
            self.listeners.emit(&enabled);
        }
        changed
    }

    /// Register a callback. It is invoked immediately with the current
    /// value, then on every change.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        callback(&self.is_enabled());
        self.listeners.subscribe(callback)
    }

    /// Receiver for tasks that select on the flag
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Polls the backend root and toggles [`FallbackMode`]
#[derive(Debug)]
pub struct PresenceProbe {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    fallback: FallbackMode,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceProbe {
    pub fn new(config: &ClientConfig, fallback: FallbackMode) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.api_url("/"),
            interval: DEFAULT_PROBE_INTERVAL,
            fallback,
            task: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn fallback(&self) -> &FallbackMode {
        &self.fallback
    }

    /// Probe once without touching the fallback flag
    pub async fn check(&self) -> bool {
        probe(&self.client, &self.url).await
    }

    /// Probe once and update the fallback flag; returns reachability
    pub async fn recheck(&self) -> bool {
        let reachable = self.check().await;
        self.fallback.set(!reachable);
        reachable
    }

    /// Start polling. The first probe runs immediately.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let client = self.client.clone();
        let url = self.url.clone();
        let fallback = self.fallback.clone();
        let period = self.interval;

        info!(url = %url, interval_secs = period.as_secs(), "Starting presence probe");
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = probe(&client, &url).await;
                fallback.set(!reachable);
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for PresenceProbe {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn probe(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).timeout(DEFAULT_PROBE_TIMEOUT).send().await {
        Ok(response) if response.status().is_success() => {
            debug!(status = %response.status(), "Backend reachable");
            true
        }
        Ok(response) => {
            debug!(status = %response.status(), "Backend answered with failure status");
            false
        }
        Err(e) => {
            debug!(error = %e, "Backend probe failed");
            false
        }
    }
}
