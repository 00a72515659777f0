//! Snapshot codec.
//!
//! Converts snapshots and whole message envelopes to the compact wire form
//! the companion transport carries. Field names on the wire are one to three
//! characters long (see [`Snapshot`]) because the transport's per-message
//! budget is small.
//!
//! Decoding fails closed: any payload that is oversized, not valid JSON,
//! missing a mandatory field, or physically implausible yields `None` and a
//! log line, never an error or a panic.
//!
//! ```rust
//! use runlink::codec;
//! use runlink::types::{PeerId, RunId, Snapshot};
//! use std::time::SystemTime;
//!
//! let snapshot = Snapshot {
//!     run_id: RunId::new("run-1"),
//!     peer_id: PeerId::new("alice"),
//!     distance_meters: 1000.0,
//!     elapsed_seconds: 300,
//!     current_pace_sec_per_km: Some(300),
//!     heart_rate_bpm: None,
//!     calories_kcal: None,
//!     latitude: None,
//!     longitude: None,
//!     sequence: 5,
//!     client_recorded_at: SystemTime::UNIX_EPOCH,
//!     is_paused: None,
//! };
//!
//! let wire = codec::encode(&snapshot).unwrap();
//! assert_eq!(codec::decode(&wire), Some(snapshot));
//! assert_eq!(codec::decode(&codec::WireForm::from(b"{}".to_vec())), None);
//! ```

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::types::{MessageEnvelope, Snapshot};
use crate::{Result, SyncError};

/// Default upper bound on an inbound payload.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

/// Opaque payload as handed to and received from the transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WireForm(Vec<u8>);

impl WireForm {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for WireForm {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for WireForm {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for WireForm {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Encode a bare snapshot.
pub fn encode(snapshot: &Snapshot) -> Result<WireForm> {
    if !snapshot.is_plausible() {
        return Err(SyncError::encode(
            "snapshot",
            format!("implausible values in sequence {}", snapshot.sequence),
        ));
    }
    to_wire("snapshot", snapshot)
}

/// Decode a bare snapshot, returning `None` on any defect.
pub fn decode(wire: &WireForm) -> Option<Snapshot> {
    decode_snapshot_bytes(wire.as_bytes(), DEFAULT_MAX_PAYLOAD_BYTES)
}

/// Decode a bare snapshot with an explicit size limit.
pub fn decode_snapshot_bytes(bytes: &[u8], max_payload_bytes: usize) -> Option<Snapshot> {
    let snapshot: Snapshot = from_wire("snapshot", bytes, max_payload_bytes)?;
    if !snapshot.is_plausible() {
        warn!(
            peer = %snapshot.peer_id,
            sequence = snapshot.sequence,
            "Dropping implausible snapshot"
        );
        return None;
    }
    Some(snapshot)
}

/// Encode a full message envelope.
pub fn encode_message(message: &MessageEnvelope) -> Result<WireForm> {
    match message {
        MessageEnvelope::Snapshot(s) | MessageEnvelope::PartnerSnapshotRelay(s)
            if !s.is_plausible() =>
        {
            Err(SyncError::encode(
                message.kind(),
                format!("implausible values in sequence {}", s.sequence),
            ))
        }
        _ => to_wire(message.kind(), message),
    }
}

/// Decode a full message envelope, returning `None` on any defect.
pub fn decode_message(wire: &WireForm, max_payload_bytes: usize) -> Option<MessageEnvelope> {
    let message: MessageEnvelope = from_wire("envelope", wire.as_bytes(), max_payload_bytes)?;
    let valid = match &message {
        MessageEnvelope::Snapshot(s) | MessageEnvelope::PartnerSnapshotRelay(s) => s.is_plausible(),
        MessageEnvelope::RunStarted(m) => m.run_id.is_valid() && m.profile.is_valid(),
        MessageEnvelope::PartnerFinished(m) => {
            m.final_distance_meters.is_finite() && m.final_distance_meters >= 0.0
        }
        other => other.run_id().is_valid(),
    };
    if !valid {
        warn!(kind = message.kind(), "Dropping implausible message");
        return None;
    }
    Some(message)
}

fn to_wire<T: serde::Serialize + ?Sized>(context: &str, value: &T) -> Result<WireForm> {
    serde_json::to_vec(value)
        .map(WireForm::from)
        .map_err(|e| SyncError::encode(context, e.to_string()))
}

fn from_wire<T: DeserializeOwned>(context: &str, bytes: &[u8], max_payload_bytes: usize) -> Option<T> {
    if bytes.len() > max_payload_bytes {
        warn!(context, len = bytes.len(), max = max_payload_bytes, "Dropping oversized payload");
        return None;
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(context, error = %e, "Dropping undecodable payload");
            None
        }
    }
}
