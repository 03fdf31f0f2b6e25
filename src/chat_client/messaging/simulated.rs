//! Local echo generator used in simulated mode.
//!
//! A send is reflected to the message listeners straight away, and a
//! canned reply from the counterpart follows after a fixed delay. Nothing
//! here touches the history endpoint.
//!
//! [`demo_history`] builds a short opening exchange for demos that want a
//! populated conversation without a backend.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::channel::MessageChannel;
use crate::shared::messaging::{IncomingMessage, Message, MessageStatus};

/// Delay before the counterpart's canned reply
pub const DEFAULT_REPLY_DELAY: Duration = Duration::from_millis(1000);

/// Replies cycled through in order
pub const CANNED_REPLIES: [&str; 4] = [
    "I'll check your records and get back to you shortly.",
    "Thank you for your message. How can I help you today?",
    "I understand your concern. Could you provide more details?",
    "Let me review this and I'll respond in a moment.",
];

/// Demo exchange, `true` where the local user speaks
pub const DEMO_HISTORY: [(bool, &str); 6] = [
    (true, "Hello Dr., I've been experiencing some mild headaches recently. They usually start in the afternoon and last a few hours."),
    (false, "Hello! I'm sorry to hear about your headaches. How long have you been experiencing them? And have you noticed any triggers?"),
    (true, "They started about a week ago. I think they might be related to stress at work, and possibly not drinking enough water."),
    (false, "That's helpful information. Stress and dehydration are common triggers. Are you taking any medication for them? And have you had any other symptoms like nausea or sensitivity to light?"),
    (true, "I've been taking over-the-counter pain relievers, which help temporarily. No nausea, but I do feel some sensitivity to bright screens."),
    (false, "Thanks for sharing that. I'd recommend increasing your water intake and taking short breaks from screens. If the headaches persist or worsen, we should schedule an appointment for a more thorough examination."),
];

/// Chronological demo conversation ending one minute before `now`.
///
/// Ids are `demo-<peer>-<n>` so a reopened conversation merges instead of
/// doubling.
pub fn demo_history(local_user_id: &str, peer_id: &str, now: DateTime<Utc>) -> Vec<Message> {
    let count = DEMO_HISTORY.len() as i64;
    DEMO_HISTORY
        .iter()
        .enumerate()
        .map(|(index, (from_local, text))| {
            let (sender, receiver) = if *from_local {
                (local_user_id, peer_id)
            } else {
                (peer_id, local_user_id)
            };
            Message::new(
                format!("demo-{}-{}", peer_id, index),
                sender,
                receiver,
                *text,
                now - chrono::Duration::minutes(count - index as i64),
                MessageStatus::Read,
            )
        })
        .collect()
}

#[derive(Debug, Default)]
struct Pending {
    next_reply: usize,
    replies: Vec<JoinHandle<()>>,
}

/// Stand-in for the backend while no real socket is available
#[derive(Debug, Clone)]
pub struct EchoSimulator {
    reply_delay: Duration,
    pending: Arc<Mutex<Pending>>,
}

impl Default for EchoSimulator {
    fn default() -> Self {
        Self::new(DEFAULT_REPLY_DELAY)
    }
}

impl EchoSimulator {
    pub fn new(reply_delay: Duration) -> Self {
        Self {
            reply_delay,
            pending: Arc::new(Mutex::new(Pending::default())),
        }
    }

    /// Echo `text` and schedule the counterpart's reply
    pub fn respond(&self, channel: &MessageChannel, local_user_id: &str, peer_id: &str, text: &str) {
        debug!(peer_id, "Simulated send");
        channel.deliver(IncomingMessage {
            id: Some(Uuid::new_v4().to_string()),
            text: text.to_string(),
            sender_id: local_user_id.to_string(),
            receiver_id: Some(peer_id.to_string()),
            timestamp: Some(Utc::now()),
            read: false,
        });

        let mut pending = self.lock();
        let reply = CANNED_REPLIES[pending.next_reply % CANNED_REPLIES.len()];
        pending.next_reply = pending.next_reply.wrapping_add(1);
        pending.replies.retain(|task| !task.is_finished());

        let channel = channel.clone();
        let delay = self.reply_delay;
        let local = local_user_id.to_string();
        let peer = peer_id.to_string();
        pending.replies.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(peer_id = %peer, "Simulated reply");
            channel.deliver(IncomingMessage {
                id: Some(Uuid::new_v4().to_string()),
                text: reply.to_string(),
                sender_id: peer,
                receiver_id: Some(local),
                timestamp: Some(Utc::now()),
                read: false,
            });
        }));
    }

    /// Drop every reply that has not been delivered yet
    pub fn cancel(&self) -> usize {
        let mut pending = self.lock();
        let live = pending.replies.iter().filter(|t| !t.is_finished()).count();
        for task in pending.replies.drain(..) {
            task.abort();
        }
        live
    }

    pub fn pending_replies(&self) -> usize {
        self.lock()
            .replies
            .iter()
            .filter(|t| !t.is_finished())
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
