//! # Reconnect Backoff
//!
//! Delay schedule for re-opening a dropped connection.
//!
//! ## Features
//!
//! - **Exponential Backoff**: `delay = min(base * 2^attempt, max)`
//! - **Max Attempts**: reconnection stops once the cap is reached
//! - **Reset**: a successful open or a network-online signal starts over
//!
//! ## Usage
//!
//! ```rust
//! use medichat::chat_client::offline::retry::ReconnectBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ReconnectBackoff::default();
//! assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
//! backoff.record_attempt();
//! assert_eq!(backoff.next_delay(), Some(Duration::from_millis(2000)));
//! ```

use std::time::Duration;

/// Default first delay
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
/// Default delay ceiling
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);
/// Default attempt cap
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Backoff strategy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed interval between attempts
    Fixed {
        interval: Duration,
    },
    /// Doubling interval, capped
    Exponential {
        base: Duration,
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Delay before attempt number `attempt` (zero-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffStrategy::Fixed { interval } => interval,
            BackoffStrategy::Exponential { base, max } => {
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                base.checked_mul(factor).unwrap_or(max).min(max)
            }
        }
    }
}

/// When and how often to reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub strategy: BackoffStrategy,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential {
                base: DEFAULT_BASE_DELAY,
                max: DEFAULT_MAX_DELAY,
            },
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt`, or `None` once the cap is reached
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then(|| self.strategy.delay(attempt))
    }
}

/// Attempt counter driven by the connection task
#[derive(Debug, Clone, Default)]
pub struct ReconnectBackoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, `None` when exhausted
    pub fn next_delay(&self) -> Option<Duration> {
        self.policy.delay_for(self.attempts)
    }

    /// Count an attempt that is being made now
    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.next_delay().is_none()
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}
