//! Transport seam between the engine and the peer link.
//!
//! The engine only needs two things from a link: a fire-and-forget send and
//! a way to try re-establishing it. Inbound payloads are pushed into the
//! engine with [`crate::RunSession::receive`], so transports never call back
//! into engine state.

use async_trait::async_trait;

use crate::Result;
use crate::codec::WireForm;
use crate::types::PeerId;

pub mod memory;

pub use memory::{Delivery, MemoryTransport};

/// Outbound half of a peer link.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Hand `payload` to the link for delivery to `to`.
    ///
    /// Must not block. `Ok` means the payload was accepted, not that it
    /// arrived; delivery is never acknowledged.
    fn send(&self, to: &PeerId, payload: WireForm) -> Result<()>;

    /// Try to bring the link back up. One call is one attempt.
    async fn reconnect(&self) -> Result<()>;
}
