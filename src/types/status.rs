//! Link health and run phase enumerations

use serde::{Deserialize, Serialize};

/// Externally observable freshness of the partner's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    /// Data age below the stale threshold.
    Connected,
    /// Data age between the stale and disconnect thresholds.
    Stale,
    /// Data age at or above the disconnect threshold.
    Disconnected,
    /// Partner reported a pause; staleness checks are suppressed.
    Paused,
}

impl ConnectionStatus {
    /// Whether the partner display may keep extrapolating.
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

/// Internal link state machine, driven by time since the last contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "camelCase")]
pub enum LinkState {
    /// Nothing received from the partner yet.
    Idle,
    Healthy,
    Degraded,
    Failed,
}

/// Run lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "camelCase")]
pub enum RunPhase {
    Idle,
    AwaitingConfirmation,
    Active,
    PausedLocally,
    PausedRemote,
    Ended,
}

impl RunPhase {
    /// Phases in which telemetry flows and timers run.
    pub fn is_running(self) -> bool {
        matches!(self, RunPhase::Active | RunPhase::PausedLocally | RunPhase::PausedRemote)
    }

    /// Phases that own a live run (including the handshake).
    pub fn has_run(self) -> bool {
        self.is_running() || self == RunPhase::AwaitingConfirmation
    }
}
