//! Telemetry snapshot and raw sensor sample types

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use super::identity::{PeerId, RunId};

/// One sequenced telemetry update from a peer.
///
/// Serialized field names are deliberately short; the companion transport
/// budgets payload bytes per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "r")]
    pub run_id: RunId,
    #[serde(rename = "p")]
    pub peer_id: PeerId,
    #[serde(rename = "d")]
    pub distance_meters: f64,
    #[serde(rename = "e")]
    pub elapsed_seconds: u32,
    #[serde(rename = "pc", default, skip_serializing_if = "Option::is_none")]
    pub current_pace_sec_per_km: Option<u32>,
    #[serde(rename = "hr", default, skip_serializing_if = "Option::is_none")]
    pub heart_rate_bpm: Option<u16>,
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub calories_kcal: Option<u32>,
    #[serde(rename = "la", default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(rename = "lo", default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(rename = "s")]
    pub sequence: u64,
    #[serde(rename = "t", with = "unix_millis")]
    pub client_recorded_at: SystemTime,
    #[serde(rename = "ps", default, skip_serializing_if = "Option::is_none")]
    pub is_paused: Option<bool>,
}

impl Snapshot {
    /// Reports whether the numeric content is physically plausible.
    ///
    /// Inbound snapshots are untrusted; anything failing this check is
    /// treated exactly like an undecodable payload.
    pub fn is_plausible(&self) -> bool {
        if !self.run_id.is_valid() || !self.peer_id.is_valid() {
            return false;
        }
        if !self.distance_meters.is_finite() || self.distance_meters < 0.0 {
            return false;
        }
        // Latitude and longitude travel together or not at all.
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => {
                lat.is_finite()
                    && lon.is_finite()
                    && (-90.0..=90.0).contains(&lat)
                    && (-180.0..=180.0).contains(&lon)
            }
            (None, None) => true,
            _ => false,
        }
    }

    pub fn paused(&self) -> bool {
        self.is_paused.unwrap_or(false)
    }

    pub fn position(&self) -> Option<Coordinate> {
        Some(Coordinate { latitude: self.latitude?, longitude: self.longitude? })
    }
}

/// A geographic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

/// A raw location fix straight from the positioning sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters; larger is worse.
    pub horizontal_accuracy: f64,
}

/// One reading from the local telemetry producer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTelemetrySample {
    pub distance_meters: f64,
    pub elapsed_seconds: u32,
    pub pace_sec_per_km: Option<u32>,
    pub heart_rate_bpm: Option<u16>,
    pub calories_kcal: Option<u32>,
    pub raw_latitude: Option<f64>,
    pub raw_longitude: Option<f64>,
    pub accuracy_meters: Option<f64>,
}

impl RawTelemetrySample {
    pub fn new(distance_meters: f64, elapsed_seconds: u32) -> Self {
        Self { distance_meters, elapsed_seconds, ..Default::default() }
    }

    pub fn with_pace(mut self, sec_per_km: u32) -> Self {
        self.pace_sec_per_km = Some(sec_per_km);
        self
    }

    pub fn with_heart_rate(mut self, bpm: u16) -> Self {
        self.heart_rate_bpm = Some(bpm);
        self
    }

    pub fn with_fix(mut self, latitude: f64, longitude: f64, accuracy_meters: f64) -> Self {
        self.raw_latitude = Some(latitude);
        self.raw_longitude = Some(longitude);
        self.accuracy_meters = Some(accuracy_meters);
        self
    }

    /// The location fix, if the sample carries a complete one.
    pub fn fix(&self) -> Option<PositionFix> {
        Some(PositionFix {
            latitude: self.raw_latitude?,
            longitude: self.raw_longitude?,
            horizontal_accuracy: self.accuracy_meters?,
        })
    }
}

/// Serde adapter storing a `SystemTime` as integer milliseconds since the epoch.
pub(crate) mod unix_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = time.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        UNIX_EPOCH
            .checked_add(Duration::from_millis(millis))
            .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
    }
}
