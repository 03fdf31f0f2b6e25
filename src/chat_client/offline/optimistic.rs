//! # Optimistic Status Timers
//!
//! After the transport accepts an optimistic send, the message is moved to
//! `sent` and then `delivered` on fixed timers.
//!
//! These transitions are a UI affordance. They are not acknowledgements:
//! nothing on the wire confirms that the counterpart received the message.
//!
//! Timers are grouped per conversation so that closing a conversation
//! aborts every timer it still owns.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::shared::messaging::MessageStatus;

/// Delays of the simulated status progression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimisticTimings {
    /// From transport acceptance to `sent`
    pub sent_after: Duration,
    /// From `sent` to `delivered`
    pub delivered_after: Duration,
}

impl Default for OptimisticTimings {
    fn default() -> Self {
        Self {
            sent_after: Duration::from_millis(500),
            delivered_after: Duration::from_millis(1000),
        }
    }
}

/// Running status timers, keyed by conversation
#[derive(Debug, Default)]
pub struct OptimisticTracker {
    timings: OptimisticTimings,
    timers: HashMap<String, Vec<JoinHandle<()>>>,
}

impl OptimisticTracker {
    pub fn new(timings: OptimisticTimings) -> Self {
        Self {
            timings,
            timers: HashMap::new(),
        }
    }

    pub fn timings(&self) -> OptimisticTimings {
        self.timings
    }

    /// Start the `sent -> delivered` progression for one message.
    ///
    /// `apply` is called with each status in turn.
    pub fn track<F>(&mut self, conversation: &str, message_id: &str, apply: F)
    where
        F: Fn(MessageStatus) + Send + 'static,
    {
        let timings = self.timings;
        let id = message_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timings.sent_after).await;
            debug!(message_id = %id, "Optimistic status -> sent");
            apply(MessageStatus::Sent);
            tokio::time::sleep(timings.delivered_after).await;
            debug!(message_id = %id, "Optimistic status -> delivered");
            apply(MessageStatus::Delivered);
        });

        let timers = self.timers.entry(conversation.to_string()).or_default();
        timers.retain(|timer| !timer.is_finished());
        timers.push(handle);
    }

    /// Abort every timer of one conversation; returns how many were live
    pub fn cancel(&mut self, conversation: &str) -> usize {
        self.timers
            .remove(conversation)
            .map(abort_all)
            .unwrap_or(0)
    }

    pub fn cancel_all(&mut self) -> usize {
        self.timers.drain().map(|(_, timers)| abort_all(timers)).sum()
    }

    /// Timers of a conversation that have not fired completely
    pub fn pending(&self, conversation: &str) -> usize {
        self.timers
            .get(conversation)
            .map(|timers| timers.iter().filter(|t| !t.is_finished()).count())
            .unwrap_or(0)
    }
}

impl Drop for OptimisticTracker {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn abort_all(timers: Vec<JoinHandle<()>>) -> usize {
    let mut live = 0;
    for timer in timers {
        if !timer.is_finished() {
            live += 1;
        }
        timer.abort();
    }
    live
}
