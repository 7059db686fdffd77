use std::sync::Arc;

use lxs_peers::PeerSnapshot;
use lxs_types::{BlockNumber, OdrRequest};

pub type EligibleFn = Arc<dyn Fn(&PeerSnapshot) -> bool + Send + Sync>;
pub type CostFn = Arc<dyn Fn(&PeerSnapshot) -> u64 + Send + Sync>;

/// A request together with the rules deciding who may serve it and what it costs them.
#[derive(Clone)]
pub struct DistRequest {
    pub request: OdrRequest,
    pub eligible: EligibleFn,
    pub cost: CostFn,
}

impl DistRequest {
    /// Eligible are peers speaking a protocol version that knows the request kind. The
    /// cost is taken from the table the peer announced.
    pub fn new(request: OdrRequest) -> Self {
        let kind = request.kind();
        let amount = request.amount();
        Self {
            request,
            eligible: Arc::new(move |peer| peer.serves(kind)),
            cost: Arc::new(move |peer| peer.costs.cost(kind, amount)),
        }
    }

    /// Narrow the eligible peers further. The protocol version check always stays.
    pub fn with_eligible<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PeerSnapshot) -> bool + Send + Sync + 'static,
    {
        let kind = self.request.kind();
        self.eligible = Arc::new(move |peer| peer.serves(kind) && predicate(peer));
        self
    }

    /// Only peers that announced a head at or past `number`.
    pub fn min_head(self, number: BlockNumber) -> Self {
        self.with_eligible(move |peer| peer.has_block(number))
    }

    pub fn with_cost<F>(mut self, cost: F) -> Self
    where
        F: Fn(&PeerSnapshot) -> u64 + Send + Sync + 'static,
    {
        self.cost = Arc::new(cost);
        self
    }

    #[inline]
    pub fn is_eligible(&self, peer: &PeerSnapshot) -> bool {
        (self.eligible)(peer)
    }

    #[inline]
    pub fn cost_for(&self, peer: &PeerSnapshot) -> u64 {
        (self.cost)(peer)
    }
}

impl std::fmt::Debug for DistRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistRequest")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}
