//! Exponential-backoff reconnection policy.
//!
//! Attempts are numbered from zero. Attempt `n` waits
//! `min(max_delay, base_delay * 2^n)` before running. Attempts `0..=max_attempts`
//! are allowed; after that the controller reports exhaustion and stops
//! scheduling. Any observed contact with the partner resets it.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl From<&EngineConfig> for BackoffPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            base_delay: config.reconnect_base_delay,
            max_delay: config.reconnect_max_delay,
            max_attempts: config.reconnect_max_attempts,
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `attempt`, or `None` once past the cap.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

/// Where the controller currently stands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconnectState {
    /// Link considered up; nothing scheduled.
    Idle,
    /// Next attempt runs at the deadline.
    Scheduled { attempt: u32, at: Instant },
    /// An attempt is running.
    InFlight { attempt: u32 },
    /// Attempts used up; no further retries.
    Exhausted,
}

/// Retry loop state for re-establishing the transport.
#[derive(Debug, Clone)]
pub struct ReconnectionController {
    policy: BackoffPolicy,
    next_attempt: u32,
    state: ReconnectState,
}

impl ReconnectionController {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, next_attempt: 0, state: ReconnectState::Idle }
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == ReconnectState::Exhausted
    }

    /// Deadline of the pending attempt, if one is scheduled.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            ReconnectState::Scheduled { at, .. } => Some(at),
            _ => None,
        }
    }

    /// Schedule the next attempt unless one is already pending.
    ///
    /// Returns the new state; `Exhausted` once the attempt cap is passed.
    pub fn schedule(&mut self, now: Instant) -> ReconnectState {
        if matches!(
            self.state,
            ReconnectState::Scheduled { .. } | ReconnectState::InFlight { .. } | ReconnectState::Exhausted
        ) {
            return self.state;
        }
        let at = self.policy.delay_for(self.next_attempt).and_then(|delay| {
            debug!(attempt = self.next_attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
            now.checked_add(delay)
        });
        self.state = match at {
            Some(at) => ReconnectState::Scheduled { attempt: self.next_attempt, at },
            None => {
                warn!(attempts = self.next_attempt, "Reconnection attempts exhausted");
                ReconnectState::Exhausted
            }
        };
        self.state
    }

    /// Start the scheduled attempt if its deadline has passed.
    pub fn begin_due(&mut self, now: Instant) -> Option<u32> {
        match self.state {
            ReconnectState::Scheduled { attempt, at } if now >= at => {
                self.state = ReconnectState::InFlight { attempt };
                self.next_attempt = attempt + 1;
                Some(attempt)
            }
            _ => None,
        }
    }

    /// The in-flight attempt returned; the caller reschedules if still down.
    pub fn attempt_finished(&mut self) {
        if let ReconnectState::InFlight { .. } = self.state {
            self.state = ReconnectState::Idle;
        }
    }

    /// Contact observed: forget all backoff.
    pub fn reset(&mut self) {
        if self.next_attempt > 0 || self.state != ReconnectState::Idle {
            info!(attempts = self.next_attempt, "Link recovered, resetting reconnect backoff");
        }
        self.next_attempt = 0;
        self.state = ReconnectState::Idle;
    }

    pub fn attempts_made(&self) -> u32 {
        self.next_attempt
    }
}
