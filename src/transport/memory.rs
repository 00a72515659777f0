//! In-process transport for tests, demos and benches.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::Transport;
use crate::codec::WireForm;
use crate::types::PeerId;
use crate::{Result, SyncError};

/// A payload that left a [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub from: PeerId,
    pub to: PeerId,
    pub payload: WireForm,
}

#[derive(Debug)]
struct Shared {
    local: PeerId,
    outbox: mpsc::UnboundedSender<Delivery>,
    online: AtomicBool,
    reconnect_calls: AtomicU32,
    sent: AtomicU32,
}

/// Channel-backed transport whose link can be toggled up and down.
///
/// Cloning yields another handle to the same link, so a test can keep one
/// handle to flip connectivity while the engine owns the other.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// Create a transport for `local`, returning the receiving end of its outbox.
    pub fn new(local: impl Into<PeerId>) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            local: local.into(),
            outbox,
            online: AtomicBool::new(true),
            reconnect_calls: AtomicU32::new(0),
            sent: AtomicU32::new(0),
        };
        (Self { shared: Arc::new(shared) }, rx)
    }

    pub fn set_online(&self, online: bool) {
        debug!(peer = %self.shared.local, online, "Memory link toggled");
        self.shared.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::SeqCst)
    }

    /// Number of reconnect attempts made so far.
    pub fn reconnect_calls(&self) -> u32 {
        self.shared.reconnect_calls.load(Ordering::SeqCst)
    }

    /// Number of payloads accepted for delivery.
    pub fn sent_count(&self) -> u32 {
        self.shared.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn send(&self, to: &PeerId, payload: WireForm) -> Result<()> {
        if !self.is_online() {
            return Err(SyncError::transport_failed("memory link is down"));
        }
        trace!(from = %self.shared.local, %to, bytes = payload.len(), "Memory send");
        let delivery = Delivery { from: self.shared.local.clone(), to: to.clone(), payload };
        self.shared
            .outbox
            .send(delivery)
            .map_err(|_| SyncError::transport_failed("memory outbox closed"))?;
        self.shared.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        self.shared.reconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_online() {
            Ok(())
        } else {
            Err(SyncError::transport_failed("memory link is still down"))
        }
    }
}
