//! Per-peer sequence tracking.
//!
//! The transport may duplicate and reorder messages. The tracker is the only
//! thing standing between that and the partner state: a snapshot is applied
//! only if its sequence is strictly greater than the last one admitted for
//! the same run and peer.

use std::collections::HashMap;
use tracing::{debug, trace};

use crate::types::{PeerId, RunId, Snapshot};

/// Monotonic admission gate for one run.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    run_id: RunId,
    last: HashMap<PeerId, u64>,
}

impl SequenceTracker {
    /// Fresh tracker for a run; every peer starts with nothing admitted.
    pub fn new(run_id: RunId) -> Self {
        Self { run_id, last: HashMap::new() }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Admit `sequence` from `peer` if it is newer than anything seen so far.
    ///
    /// Returns `false` without touching state for duplicates and stale values.
    pub fn admit(&mut self, peer: &PeerId, sequence: u64) -> bool {
        match self.last.get_mut(peer) {
            Some(last) if sequence <= *last => {
                trace!(%peer, sequence, last = *last, "Rejecting stale or duplicate sequence");
                false
            }
            Some(last) => {
                *last = sequence;
                true
            }
            None => {
                self.last.insert(peer.clone(), sequence);
                true
            }
        }
    }

    /// Admit a snapshot, also rejecting ones that belong to a different run.
    pub fn admit_snapshot(&mut self, snapshot: &Snapshot) -> bool {
        if snapshot.run_id != self.run_id {
            debug!(
                expected = %self.run_id,
                got = %snapshot.run_id,
                "Rejecting snapshot from another run"
            );
            return false;
        }
        self.admit(&snapshot.peer_id, snapshot.sequence)
    }

    /// Last admitted sequence for `peer`, if any.
    pub fn last_sequence(&self, peer: &PeerId) -> Option<u64> {
        self.last.get(peer).copied()
    }

    /// Switch to a new run, dropping all per-peer state.
    pub fn reset(&mut self, run_id: RunId) {
        self.run_id = run_id;
        self.last.clear();
    }
}
