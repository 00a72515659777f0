//! Core types shared across the synchronization engine.
//!
//! ## Architecture
//!
//! - [`Snapshot`] is the sequenced telemetry update each peer publishes
//! - [`MessageEnvelope`] is the closed set of messages on the transport
//! - [`RawTelemetrySample`] is what the local sensor producer yields
//! - [`RunEvent`] is what the engine tells the presentation layer
//! - [`RunRecoveryState`] is the only thing persisted between launches
//!
//! ## Usage Example
//!
//! ```rust
//! use runlink::types::{MessageEnvelope, PeerId, RunId, Snapshot};
//! use std::time::SystemTime;
//!
//! let snapshot = Snapshot {
//!     run_id: RunId::new("run-1"),
//!     peer_id: PeerId::new("alice"),
//!     distance_meters: 1234.5,
//!     elapsed_seconds: 371,
//!     current_pace_sec_per_km: Some(300),
//!     heart_rate_bpm: Some(151),
//!     calories_kcal: None,
//!     latitude: None,
//!     longitude: None,
//!     sequence: 7,
//!     client_recorded_at: SystemTime::now(),
//!     is_paused: None,
//! };
//!
//! let envelope = MessageEnvelope::Snapshot(snapshot);
//! assert_eq!(envelope.kind(), "snapshot");
//! assert_eq!(envelope.run_id().as_str(), "run-1");
//! ```

mod event;
mod identity;
mod message;
mod recovery;
mod snapshot;
mod status;
mod update_rate;

pub use event::{EndReason, RunEvent, Runner};
pub use identity::{LocalProfile, MAX_IDENTIFIER_LEN, PartnerProfile, PeerId, RunId};
pub use message::{
    Heartbeat, MessageEnvelope, PartnerFinished, PauseChange, RunConfirmed, RunEnded, RunStarted,
};
pub use recovery::RunRecoveryState;
pub use snapshot::{Coordinate, PositionFix, RawTelemetrySample, Snapshot};
pub use status::{ConnectionStatus, LinkState, RunPhase};
pub use update_rate::UpdateRate;
