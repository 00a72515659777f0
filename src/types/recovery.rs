//! Persisted run state for crash recovery

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use super::identity::{PeerId, RunId};
use super::snapshot::unix_millis;

/// Just enough to resume the current run after a crash.
///
/// Kept separate from the in-memory run state so display-only values can
/// never be persisted by accident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecoveryState {
    pub run_id: RunId,
    pub partner_id: PeerId,
    pub partner_display_name: String,
    pub my_last_distance: f64,
    pub my_last_elapsed_seconds: u32,
    #[serde(with = "unix_millis")]
    pub started_at: SystemTime,
    pub last_sequence: u64,
}
