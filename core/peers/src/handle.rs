use lxs_types::{BlockNumber, CostTable, Head, NodeId, RequestKind};
use tokio_util::sync::CancellationToken;

/// A lightweight reference to a registered peer.
///
/// A handle never keeps the peer alive. It is the identity of one registration plus a
/// token that fires when that registration ends, everything else has to be looked up
/// through the [`PeerRegistry`](crate::PeerRegistry) again.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    pub(crate) id: NodeId,
    pub(crate) generation: u64,
    pub(crate) lost: CancellationToken,
}

impl PeerHandle {
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Returns true once the peer has been unregistered.
    #[inline]
    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// Resolves when the peer is unregistered.
    pub async fn lost(&self) {
        self.lost.cancelled().await
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.generation == other.generation
    }
}

impl Eq for PeerHandle {}

/// Point in time copy of a peer's metadata, taken under the peer's lock.
#[derive(Clone, Debug)]
pub struct PeerSnapshot {
    pub handle: PeerHandle,
    pub protocol_version: u32,
    pub head: Head,
    pub budget: u64,
    pub outstanding: u64,
    pub costs: CostTable,
}

impl PeerSnapshot {
    #[inline]
    pub fn id(&self) -> NodeId {
        self.handle.id
    }

    /// Fraction of the budget currently reserved. A peer without budget is always full.
    pub fn load(&self) -> f64 {
        if self.budget == 0 {
            return f64::INFINITY;
        }
        self.outstanding as f64 / self.budget as f64
    }

    pub fn serves(&self, kind: RequestKind) -> bool {
        self.protocol_version >= kind.min_protocol_version()
    }

    pub fn has_block(&self, number: BlockNumber) -> bool {
        self.head.number >= number
    }
}
