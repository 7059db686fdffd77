pub mod anchors;
pub mod logging;
pub mod mock;
pub mod proof;

use lxs_types::{Head, NodeId, PeerInfo, B256, LPV2};

/// Handshake data of a v2 server at `head_number` with room for `budget` default-cost
/// requests.
pub fn peer_info(index: u32, head_number: u64, budget: u64) -> PeerInfo {
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&head_number.to_be_bytes());
    PeerInfo::new(
        NodeId::from_index(index),
        LPV2,
        Head::new(head_number, B256::from(hash)),
        budget,
    )
}
