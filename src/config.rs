//! Engine configuration.
//!
//! Every timing constant the engine uses is tunable. Durations are written
//! as fractional seconds so a YAML override stays readable:
//!
//! ```yaml
//! publish_interval: 3
//! ui_refresh_interval: 0.1
//! disconnect_threshold: 20
//! ```
//!
//! Omitted keys keep their defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::{Result, SyncError};

/// Longest duration any setting may take.
pub const MAX_CONFIG_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Tunables for the synchronization engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Snapshot publish cadence.
    #[serde(with = "duration_secs")]
    pub publish_interval: Duration,
    /// Publish cadence while the device reports low battery.
    #[serde(with = "duration_secs")]
    pub low_battery_publish_interval: Duration,
    /// Display interpolation cadence.
    #[serde(with = "duration_secs")]
    pub ui_refresh_interval: Duration,
    /// Interpolation cadence while the surface is backgrounded.
    #[serde(with = "duration_secs")]
    pub background_ui_refresh_interval: Duration,
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,
    /// Heartbeat age beyond which the link is no longer healthy.
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub stale_threshold: Duration,
    #[serde(with = "duration_secs")]
    pub disconnect_threshold: Duration,
    /// Disconnect duration after which the run is ended automatically.
    #[serde(with = "duration_secs")]
    pub extended_disconnect_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub reconnect_base_delay: Duration,
    #[serde(with = "duration_secs")]
    pub reconnect_max_delay: Duration,
    pub reconnect_max_attempts: u32,
    /// End the run once reconnection gives up; otherwise wait for a manual retry.
    pub auto_end_on_reconnect_exhausted: bool,
    /// How long a new lead must hold before it is announced.
    #[serde(with = "duration_secs")]
    pub lead_change_debounce: Duration,
    /// Distance gap below which the runners count as tied.
    pub lead_change_min_margin_meters: f64,
    /// Fixes with a worse horizontal accuracy are discarded.
    pub position_min_accuracy_meters: f64,
    /// Process noise of the position filter, in meters per second.
    pub position_process_noise: f64,
    /// Upper bound on dead-reckoned distance beyond the last snapshot.
    pub max_extrapolation_meters: f64,
    #[serde(with = "duration_secs")]
    pub confirmation_timeout: Duration,
    /// Inbound payloads above this size are dropped undecoded.
    pub max_payload_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            publish_interval: Duration::from_secs(3),
            low_battery_publish_interval: Duration::from_secs(6),
            ui_refresh_interval: Duration::from_millis(100),
            background_ui_refresh_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(3),
            heartbeat_timeout: Duration::from_secs(6),
            stale_threshold: Duration::from_secs(8),
            disconnect_threshold: Duration::from_secs(15),
            extended_disconnect_timeout: Duration::from_secs(180),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_max_attempts: 10,
            auto_end_on_reconnect_exhausted: true,
            lead_change_debounce: Duration::from_secs(5),
            lead_change_min_margin_meters: 5.0,
            position_min_accuracy_meters: 50.0,
            position_process_noise: 3.0,
            max_extrapolation_meters: 30.0,
            confirmation_timeout: Duration::from_secs(60),
            max_payload_bytes: 4096,
        }
    }
}

impl EngineConfig {
    /// Parse a YAML document, applying defaults for omitted keys, and validate it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml_ng::from_str(yaml)
            .map_err(|e| SyncError::config("<document>", format!("YAML parsing failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading engine configuration");
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| SyncError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Check the relationships between thresholds.
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("publish_interval", self.publish_interval),
            ("low_battery_publish_interval", self.low_battery_publish_interval),
            ("ui_refresh_interval", self.ui_refresh_interval),
            ("background_ui_refresh_interval", self.background_ui_refresh_interval),
            ("heartbeat_interval", self.heartbeat_interval),
            ("heartbeat_timeout", self.heartbeat_timeout),
            ("stale_threshold", self.stale_threshold),
            ("reconnect_base_delay", self.reconnect_base_delay),
            ("confirmation_timeout", self.confirmation_timeout),
        ];
        for (field, value) in non_zero {
            if value.is_zero() {
                return Err(SyncError::config(field, "must be greater than zero"));
            }
        }
        let bounded = [
            ("publish_interval", self.publish_interval),
            ("low_battery_publish_interval", self.low_battery_publish_interval),
            ("ui_refresh_interval", self.ui_refresh_interval),
            ("background_ui_refresh_interval", self.background_ui_refresh_interval),
            ("heartbeat_interval", self.heartbeat_interval),
            ("heartbeat_timeout", self.heartbeat_timeout),
            ("stale_threshold", self.stale_threshold),
            ("disconnect_threshold", self.disconnect_threshold),
            ("extended_disconnect_timeout", self.extended_disconnect_timeout),
            ("reconnect_base_delay", self.reconnect_base_delay),
            ("reconnect_max_delay", self.reconnect_max_delay),
            ("lead_change_debounce", self.lead_change_debounce),
            ("confirmation_timeout", self.confirmation_timeout),
        ];
        for (field, value) in bounded {
            if value > MAX_CONFIG_DURATION {
                return Err(SyncError::config(field, "must not exceed 24 hours"));
            }
        }

        if self.stale_threshold >= self.disconnect_threshold {
            return Err(SyncError::config(
                "stale_threshold",
                "must be shorter than disconnect_threshold",
            ));
        }
        if self.disconnect_threshold >= self.extended_disconnect_timeout {
            return Err(SyncError::config(
                "disconnect_threshold",
                "must be shorter than extended_disconnect_timeout",
            ));
        }
        if self.reconnect_base_delay > self.reconnect_max_delay {
            return Err(SyncError::config(
                "reconnect_base_delay",
                "must not exceed reconnect_max_delay",
            ));
        }
        if !(self.position_min_accuracy_meters > 0.0) {
            return Err(SyncError::config("position_min_accuracy_meters", "must be positive"));
        }
        if !(self.position_process_noise > 0.0) {
            return Err(SyncError::config("position_process_noise", "must be positive"));
        }
        if !(self.max_extrapolation_meters >= 0.0) || !(self.lead_change_min_margin_meters >= 0.0)
        {
            return Err(SyncError::config(
                "max_extrapolation_meters",
                "distances must be non-negative",
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(SyncError::config("max_payload_bytes", "must be greater than zero"));
        }
        Ok(())
    }

    /// Publish cadence for the given battery condition.
    pub fn publish_interval_for(&self, low_battery: bool) -> Duration {
        if low_battery { self.low_battery_publish_interval } else { self.publish_interval }
    }

    /// Refresh cadence for the given surface activity.
    pub fn ui_refresh_interval_for(&self, reduced_activity: bool) -> Duration {
        if reduced_activity { self.background_ui_refresh_interval } else { self.ui_refresh_interval }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
