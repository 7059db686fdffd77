use std::sync::Weak;

use lxs_types::NodeId;

use crate::registry::PeerEntry;

/// Cost held against a peer's budget. Released when dropped, no matter how the owning
/// attempt ended.
#[must_use = "the reservation is released as soon as it is dropped"]
pub struct Reservation {
    pub(crate) peer: NodeId,
    pub(crate) cost: u64,
    pub(crate) entry: Weak<PeerEntry>,
}

impl Reservation {
    pub fn peer(&self) -> NodeId {
        self.peer
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        // The peer may already be gone, its counter died with it.
        if let Some(entry) = self.entry.upgrade() {
            entry.release(self.cost);
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("peer", &self.peer)
            .field("cost", &self.cost)
            .finish()
    }
}
