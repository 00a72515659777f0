//! Update rate control for partner display streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delivery rate requested by a display subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum UpdateRate {
    /// Every UI refresh tick.
    Native,

    /// At most this many updates per second.
    /// Rates at or above the refresh rate collapse to Native.
    Max(u32),
}

impl UpdateRate {
    /// Normalize against the engine's refresh interval.
    pub fn normalize(self, refresh_interval: Duration) -> Self {
        let refresh_hz = 1.0 / refresh_interval.as_secs_f64().max(f64::EPSILON);
        match self {
            UpdateRate::Native => UpdateRate::Native,
            UpdateRate::Max(0) => UpdateRate::Native,
            UpdateRate::Max(hz) if hz as f64 >= refresh_hz => UpdateRate::Native,
            UpdateRate::Max(hz) => UpdateRate::Max(hz),
        }
    }

    /// Throttle interval, if the rate is below the refresh rate.
    pub fn throttle_interval(self, refresh_interval: Duration) -> Option<Duration> {
        match self.normalize(refresh_interval) {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}
