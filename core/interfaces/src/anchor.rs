use lxs_types::B256;

/// A root published by a chain indexer, valid for every section up to and including
/// `section`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrustAnchor {
    pub section: u64,
    pub root: B256,
}

/// Source of the roots historical proofs are checked against.
///
/// The canonical-hash trie maps block numbers to canonical hashes and total difficulty,
/// the bloom trie maps `(bit, section)` to the compressed bloom bits of that section.
pub trait TrustAnchorProvider: Send + Sync + 'static {
    /// Latest known canonical-hash trie root.
    fn cht_root(&self) -> Option<TrustAnchor>;

    /// Latest known bloom trie root.
    fn bloom_trie_root(&self) -> Option<TrustAnchor>;
}
