//! The closed set of messages exchanged between paired devices

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use super::event::EndReason;
use super::identity::{PartnerProfile, PeerId, RunId};
use super::snapshot::{Snapshot, unix_millis};

/// Tagged payload carried over the transport.
///
/// Receivers dispatch on the variant alone; there is no string-keyed
/// fallback for unknown tags, an unknown tag simply fails to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "k", content = "b")]
pub enum MessageEnvelope {
    #[serde(rename = "snap")]
    Snapshot(Snapshot),
    #[serde(rename = "hb")]
    Heartbeat(Heartbeat),
    /// A partner snapshot forwarded by the companion device.
    #[serde(rename = "relay")]
    PartnerSnapshotRelay(Snapshot),
    #[serde(rename = "start")]
    RunStarted(RunStarted),
    #[serde(rename = "end")]
    RunEnded(RunEnded),
    #[serde(rename = "fin")]
    PartnerFinished(PartnerFinished),
    #[serde(rename = "conf")]
    WatchSideConfirmed(RunConfirmed),
    #[serde(rename = "pause")]
    Pause(PauseChange),
    #[serde(rename = "resume")]
    Resume(PauseChange),
}

impl MessageEnvelope {
    /// The run this message belongs to.
    pub fn run_id(&self) -> &RunId {
        match self {
            MessageEnvelope::Snapshot(s) | MessageEnvelope::PartnerSnapshotRelay(s) => &s.run_id,
            MessageEnvelope::Heartbeat(h) => &h.run_id,
            MessageEnvelope::RunStarted(m) => &m.run_id,
            MessageEnvelope::RunEnded(m) => &m.run_id,
            MessageEnvelope::PartnerFinished(m) => &m.run_id,
            MessageEnvelope::WatchSideConfirmed(m) => &m.run_id,
            MessageEnvelope::Pause(m) | MessageEnvelope::Resume(m) => &m.run_id,
        }
    }

    /// Short tag used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageEnvelope::Snapshot(_) => "snapshot",
            MessageEnvelope::Heartbeat(_) => "heartbeat",
            MessageEnvelope::PartnerSnapshotRelay(_) => "partnerSnapshotRelay",
            MessageEnvelope::RunStarted(_) => "runStarted",
            MessageEnvelope::RunEnded(_) => "runEnded",
            MessageEnvelope::PartnerFinished(_) => "partnerFinished",
            MessageEnvelope::WatchSideConfirmed(_) => "watchSideConfirmed",
            MessageEnvelope::Pause(_) => "pause",
            MessageEnvelope::Resume(_) => "resume",
        }
    }
}

/// Liveness-only message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(rename = "r")]
    pub run_id: RunId,
    #[serde(rename = "p")]
    pub peer_id: PeerId,
    #[serde(rename = "t", with = "unix_millis")]
    pub sent_at: SystemTime,
}

/// Invitation to a shared run, carrying the sender's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStarted {
    #[serde(rename = "r")]
    pub run_id: RunId,
    #[serde(rename = "pf")]
    pub profile: PartnerProfile,
    #[serde(rename = "t", with = "unix_millis")]
    pub started_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEnded {
    #[serde(rename = "r")]
    pub run_id: RunId,
    #[serde(rename = "p")]
    pub peer_id: PeerId,
    #[serde(rename = "why")]
    pub reason: EndReason,
}

/// Final numbers from a runner who completed the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerFinished {
    #[serde(rename = "r")]
    pub run_id: RunId,
    #[serde(rename = "p")]
    pub peer_id: PeerId,
    #[serde(rename = "d")]
    pub final_distance_meters: f64,
    #[serde(rename = "e")]
    pub elapsed_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfirmed {
    #[serde(rename = "r")]
    pub run_id: RunId,
    #[serde(rename = "p")]
    pub peer_id: PeerId,
}

/// Pause or resume notice.
///
/// `as_of_sequence` is the sender's most recently published snapshot
/// sequence, so a late notice never overrides a newer snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseChange {
    #[serde(rename = "r")]
    pub run_id: RunId,
    #[serde(rename = "p")]
    pub peer_id: PeerId,
    #[serde(rename = "s")]
    pub as_of_sequence: u64,
}
