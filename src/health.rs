//! Connection health monitoring.
//!
//! Classifies the link to the partner from the age of the last contact
//! (heartbeat or admitted snapshot) against three thresholds. A partner whose
//! last admitted snapshot says it is paused is reported as
//! [`ConnectionStatus::Paused`] instead of stale or disconnected, because a
//! paused runner legitimately stops publishing movement data. The pause
//! override does not extend past the extended-disconnect timeout.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::types::{ConnectionStatus, LinkState};

/// Thresholds the monitor classifies against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub heartbeat_timeout: Duration,
    pub stale: Duration,
    pub disconnect: Duration,
    pub extended_disconnect: Duration,
}

impl From<&EngineConfig> for HealthThresholds {
    fn from(config: &EngineConfig) -> Self {
        Self {
            heartbeat_timeout: config.heartbeat_timeout,
            stale: config.stale_threshold,
            disconnect: config.disconnect_threshold,
            extended_disconnect: config.extended_disconnect_timeout,
        }
    }
}

/// Liveness bookkeeping for one partner link.
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    thresholds: HealthThresholds,
    /// When monitoring began; stands in for contact until the first message.
    monitoring_since: Instant,
    last_heartbeat_sent: Option<Instant>,
    last_heartbeat_received: Option<Instant>,
    last_data_received: Option<Instant>,
    consecutive_failures: u32,
    partner_paused: bool,
}

impl ConnectionHealth {
    pub fn new(thresholds: HealthThresholds, now: Instant) -> Self {
        Self {
            thresholds,
            monitoring_since: now,
            last_heartbeat_sent: None,
            last_heartbeat_received: None,
            last_data_received: None,
            consecutive_failures: 0,
            partner_paused: false,
        }
    }

    pub fn record_heartbeat_sent(&mut self, now: Instant) {
        self.last_heartbeat_sent = Some(now);
    }

    pub fn record_heartbeat_received(&mut self, now: Instant) {
        self.last_heartbeat_received = Some(now);
        self.consecutive_failures = 0;
    }

    /// An admitted snapshot also proves the link is alive.
    pub fn record_data_received(&mut self, now: Instant, partner_paused: bool) {
        self.last_data_received = Some(now);
        self.partner_paused = partner_paused;
        self.consecutive_failures = 0;
    }

    /// Pause state learned from a pause/resume notice rather than a snapshot.
    pub fn set_partner_paused(&mut self, paused: bool) {
        self.partner_paused = paused;
    }

    pub fn record_send_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_heartbeat_sent(&self) -> Option<Instant> {
        self.last_heartbeat_sent
    }

    pub fn last_heartbeat_received(&self) -> Option<Instant> {
        self.last_heartbeat_received
    }

    pub fn partner_paused(&self) -> bool {
        self.partner_paused
    }

    /// Most recent contact of any kind.
    pub fn last_contact(&self) -> Option<Instant> {
        self.last_heartbeat_received.max(self.last_data_received)
    }

    /// Time since the last contact, or since monitoring began.
    pub fn data_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_contact().unwrap_or(self.monitoring_since))
    }

    /// `now - lastHeartbeatReceived < heartbeatTimeout`.
    pub fn is_healthy(&self, now: Instant) -> bool {
        self.last_heartbeat_received
            .is_some_and(|at| now.saturating_duration_since(at) < self.thresholds.heartbeat_timeout)
    }

    pub fn link_state(&self, now: Instant) -> LinkState {
        if self.last_contact().is_none() && self.data_age(now) < self.thresholds.stale {
            return LinkState::Idle;
        }
        let age = self.data_age(now);
        if age < self.thresholds.stale {
            LinkState::Healthy
        } else if age < self.thresholds.disconnect {
            LinkState::Degraded
        } else {
            LinkState::Failed
        }
    }

    pub fn status(&self, now: Instant) -> ConnectionStatus {
        if self.partner_paused && !self.extended_disconnect_elapsed(now) {
            return ConnectionStatus::Paused;
        }
        let age = self.data_age(now);
        if age < self.thresholds.stale {
            ConnectionStatus::Connected
        } else if age < self.thresholds.disconnect {
            ConnectionStatus::Stale
        } else {
            ConnectionStatus::Disconnected
        }
    }

    /// Whether the partner has been silent past the auto-end boundary.
    pub fn extended_disconnect_elapsed(&self, now: Instant) -> bool {
        self.data_age(now) >= self.thresholds.extended_disconnect
    }
}
