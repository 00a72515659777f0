//! Live synchronization engine for virtual partner runs.
//!
//! Two runners in different places start a run together; each device
//! publishes sequenced snapshots of its own progress and shows the partner's
//! progress smoothly, even though updates arrive every few seconds over an
//! unreliable link.
//!
//! # Features
//!
//! - **Compact wire codec**: short-key snapshots that fit small message budgets
//! - **Ordering**: per-peer sequence tracking drops stale and duplicate updates
//! - **Smooth display**: pace-based dead reckoning between snapshots
//! - **Health and recovery**: heartbeat monitoring, exponential-backoff
//!   reconnection, crash recovery of the run in progress
//! - **Single writer**: all run state lives in one engine task
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use runlink::providers::ChannelProvider;
//! use runlink::recovery::MemoryRecoveryStore;
//! use runlink::transport::MemoryTransport;
//! use runlink::{EngineConfig, LocalProfile, PartnerProfile, RunSession, UpdateRate};
//!
//! #[tokio::main]
//! async fn main() -> runlink::Result<()> {
//!     let (transport, _outbox) = MemoryTransport::new("alice");
//!     let (provider, _samples) = ChannelProvider::new(16);
//!     let session = RunSession::spawn(
//!         EngineConfig::default(),
//!         LocalProfile::new("alice", "Alice"),
//!         transport,
//!         MemoryRecoveryStore::new(),
//!         provider,
//!     )?;
//!
//!     session.start_run("morning-5k", PartnerProfile::new("bob", "Bob")).await?;
//!
//!     let mut partner = session.partner_updates(UpdateRate::Max(4));
//!     while let Some(display) = partner.next().await {
//!         println!("{}: {:.0} m ({:?})", display.display_name, display.distance_meters, display.status);
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Wire format and configuration
pub mod codec;
pub mod config;

// Run state components
pub mod health;
pub mod lifecycle;
pub mod milestones;
pub mod partner;
pub mod reconnect;
pub mod sequence;
pub mod smoothing;

// Runtime: tasks, seams and the public handle
mod driver;
pub mod provider;
pub mod providers;
pub mod recovery;
pub mod session;
pub mod stream;
pub mod transport;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use codec::WireForm;
pub use config::EngineConfig;
pub use partner::PartnerDisplay;
pub use provider::TelemetryProvider;
pub use recovery::{FileRecoveryStore, MemoryRecoveryStore, RecoveryStore};
pub use session::{InboundHandle, RunSession};
pub use transport::Transport;
