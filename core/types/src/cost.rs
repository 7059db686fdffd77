use crate::RequestKind;

/// Charge for a single request of some kind: `base + per_item * amount`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestCost {
    pub base: u64,
    pub per_item: u64,
}

impl RequestCost {
    pub const fn new(base: u64, per_item: u64) -> Self {
        Self { base, per_item }
    }

    #[inline]
    pub fn of(&self, amount: u64) -> u64 {
        self.base.saturating_add(self.per_item.saturating_mul(amount))
    }
}

impl Default for RequestCost {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

/// The cost table a server announces during the handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CostTable {
    pub header: RequestCost,
    pub trie_node: RequestCost,
    pub receipts: RequestCost,
    pub bloom_bits: RequestCost,
    pub code: RequestCost,
    pub transactions: RequestCost,
}

impl CostTable {
    /// A table charging the same for every kind of request.
    pub const fn uniform(cost: RequestCost) -> Self {
        Self {
            header: cost,
            trie_node: cost,
            receipts: cost,
            bloom_bits: cost,
            code: cost,
            transactions: cost,
        }
    }

    pub fn get(&self, kind: RequestKind) -> RequestCost {
        match kind {
            RequestKind::Header => self.header,
            RequestKind::TrieNode => self.trie_node,
            RequestKind::Receipts => self.receipts,
            RequestKind::BloomBits => self.bloom_bits,
            RequestKind::Code => self.code,
            RequestKind::Transactions => self.transactions,
        }
    }

    /// Total charge for `amount` items of the given kind.
    pub fn cost(&self, kind: RequestKind, amount: u64) -> u64 {
        self.get(kind).of(amount)
    }
}
