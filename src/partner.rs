//! Partner state and display interpolation.
//!
//! Raw fields hold exactly what the last admitted snapshot said. Display
//! fields are derived on every refresh tick by dead-reckoning from the last
//! known pace, and are never sent anywhere. Interpolation only runs while the
//! link is [`ConnectionStatus::Connected`]; once the data goes stale, the
//! partner disconnects, or the partner pauses, the display holds its last
//! value.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::types::{ConnectionStatus, Coordinate, PartnerProfile, PeerId, Snapshot};

/// Everything known about the remote runner.
#[derive(Debug, Clone)]
pub struct PartnerState {
    pub profile: PartnerProfile,

    pub raw_distance: f64,
    pub raw_elapsed_seconds: u32,
    pub current_pace: Option<u32>,
    pub heart_rate: Option<u16>,
    pub calories: Option<u32>,
    pub position: Option<Coordinate>,
    /// Local clock at admission, not the producer's clock.
    pub last_received_at: Option<Instant>,
    pub last_sequence: Option<u64>,
    pub is_paused: bool,
    pub finished: bool,

    pub display_distance: f64,
    pub display_elapsed_seconds: u32,
}

impl PartnerState {
    pub fn new(profile: PartnerProfile) -> Self {
        Self {
            profile,
            raw_distance: 0.0,
            raw_elapsed_seconds: 0,
            current_pace: None,
            heart_rate: None,
            calories: None,
            position: None,
            last_received_at: None,
            last_sequence: None,
            is_paused: false,
            finished: false,
            display_distance: 0.0,
            display_elapsed_seconds: 0,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.profile.peer_id
    }

    /// Whether at least one snapshot has been applied.
    pub fn has_data(&self) -> bool {
        self.last_sequence.is_some()
    }

    /// Overwrite raw values with an admitted snapshot.
    ///
    /// Callers must have passed the snapshot through the sequence tracker.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot, now: Instant) {
        self.raw_distance = snapshot.distance_meters;
        self.raw_elapsed_seconds = snapshot.elapsed_seconds;
        self.current_pace = snapshot.current_pace_sec_per_km;
        self.heart_rate = snapshot.heart_rate_bpm;
        self.calories = snapshot.calories_kcal;
        if let Some(position) = snapshot.position() {
            self.position = Some(position);
        }
        self.last_received_at = Some(now);
        self.last_sequence = Some(snapshot.sequence);
        self.is_paused = snapshot.paused();

        self.display_distance = self.raw_distance;
        self.display_elapsed_seconds = self.raw_elapsed_seconds;
    }

    /// Record the partner's final numbers; the display freezes on them.
    pub fn apply_finished(&mut self, final_distance: f64, elapsed_seconds: u32) {
        self.finished = true;
        self.raw_distance = final_distance;
        self.raw_elapsed_seconds = elapsed_seconds;
        self.display_distance = final_distance;
        self.display_elapsed_seconds = elapsed_seconds;
    }

    /// Refresh display values for the current instant.
    ///
    /// Only display fields change. Extra distance is
    /// `(1000 / pace) * secondsSinceReceipt`, capped at `max_extrapolation_meters`.
    pub fn interpolate(
        &mut self,
        now: Instant,
        status: ConnectionStatus,
        max_extrapolation_meters: f64,
    ) {
        if self.finished || self.is_paused || !status.is_live() {
            return;
        }
        let Some(received_at) = self.last_received_at else {
            return;
        };

        let gap = now.saturating_duration_since(received_at);
        let extra = match self.current_pace {
            Some(pace) if pace > 0 => {
                ((1000.0 / pace as f64) * gap.as_secs_f64()).min(max_extrapolation_meters)
            }
            _ => 0.0,
        };

        self.display_distance = self.raw_distance + extra;
        self.display_elapsed_seconds = self.raw_elapsed_seconds.saturating_add(gap.as_secs() as u32);
    }

    /// Heart-rate training zone (1..=5) relative to the partner's max heart rate.
    pub fn heart_rate_zone(&self) -> Option<u8> {
        let max = self.profile.max_heart_rate.filter(|m| *m > 0)?;
        let pct = self.heart_rate? as f64 / max as f64;
        Some(match pct {
            p if p < 0.6 => 1,
            p if p < 0.7 => 2,
            p if p < 0.8 => 3,
            p if p < 0.9 => 4,
            _ => 5,
        })
    }

    /// Immutable view for presentation.
    pub fn display(&self, status: ConnectionStatus) -> PartnerDisplay {
        PartnerDisplay {
            peer_id: self.profile.peer_id.clone(),
            display_name: self.profile.display_name.clone(),
            avatar: self.profile.avatar.clone(),
            distance_meters: self.display_distance,
            elapsed_seconds: self.display_elapsed_seconds,
            pace_sec_per_km: self.current_pace,
            heart_rate_bpm: self.heart_rate,
            heart_rate_zone: self.heart_rate_zone(),
            position: self.position,
            status,
            finished: self.finished,
        }
    }
}

/// Presentation snapshot of the partner, published on every refresh tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct PartnerDisplay {
    pub peer_id: PeerId,
    pub display_name: String,
    pub avatar: Option<String>,
    pub distance_meters: f64,
    pub elapsed_seconds: u32,
    pub pace_sec_per_km: Option<u32>,
    pub heart_rate_bpm: Option<u16>,
    pub heart_rate_zone: Option<u8>,
    pub position: Option<Coordinate>,
    pub status: ConnectionStatus,
    pub finished: bool,
}
