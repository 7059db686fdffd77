use alloy_rlp::{Encodable, Header};
use lxs_types::{keccak256, Bytes, B256};

/// Build a trie holding exactly one leaf and return its root together with the proof of
/// `key`. The same proof also proves the absence of every other key.
pub fn single_leaf_trie(key: &[u8], value: &[u8]) -> (B256, Vec<Bytes>) {
    // Hex prefix encoding of an even length leaf path.
    let mut path = Vec::with_capacity(key.len() + 1);
    path.push(0x20);
    path.extend_from_slice(key);

    let mut payload = Vec::new();
    path.as_slice().encode(&mut payload);
    value.encode(&mut payload);

    let mut node = Vec::with_capacity(payload.len() + 4);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut node);
    node.extend_from_slice(&payload);

    (keccak256(&node), vec![Bytes::from(node)])
}
