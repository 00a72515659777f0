//! Domain events emitted to the presentation layer

use serde::{Deserialize, Serialize};

use super::status::{ConnectionStatus, RunPhase};

/// Which runner an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "camelCase")]
pub enum Runner {
    Me,
    Partner,
}

/// Why a run ended without the local runner finishing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    /// A runner threw the run away.
    Discarded,
    /// Partner silent beyond the extended-disconnect timeout.
    ExtendedDisconnect,
    /// Reconnection attempts ran out.
    ReconnectExhausted,
    /// The partner never confirmed the invitation.
    ConfirmationTimeout,
    /// The partner ended the run on their side.
    PartnerEnded,
}

/// One-shot events for rendering or announcing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunEvent {
    KilometerCrossed { runner: Runner, kilometer: u32 },
    LeadChanged { is_leading: bool },
    PartnerFinished { final_distance_meters: f64, elapsed_seconds: u32 },
    ConnectionStatusChanged { status: ConnectionStatus },
    RunAutoEnded { reason: EndReason },
    /// Reconnection gave up and the run stays open; offer a manual retry.
    ReconnectExhausted { attempts: u32 },
    PhaseChanged { phase: RunPhase },
}
