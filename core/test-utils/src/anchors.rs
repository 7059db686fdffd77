use lxs_interfaces::{TrustAnchor, TrustAnchorProvider};
use parking_lot::Mutex;

/// Trust anchors that are set by hand instead of being built by an indexer.
#[derive(Default)]
pub struct StaticAnchors {
    cht: Mutex<Option<TrustAnchor>>,
    bloom: Mutex<Option<TrustAnchor>>,
}

impl StaticAnchors {
    pub fn new(cht: Option<TrustAnchor>, bloom: Option<TrustAnchor>) -> Self {
        Self {
            cht: Mutex::new(cht),
            bloom: Mutex::new(bloom),
        }
    }

    pub fn set_cht(&self, anchor: TrustAnchor) {
        *self.cht.lock() = Some(anchor);
    }

    pub fn set_bloom_trie(&self, anchor: TrustAnchor) {
        *self.bloom.lock() = Some(anchor);
    }
}

impl TrustAnchorProvider for StaticAnchors {
    fn cht_root(&self) -> Option<TrustAnchor> {
        *self.cht.lock()
    }

    fn bloom_trie_root(&self) -> Option<TrustAnchor> {
        *self.bloom.lock()
    }
}
