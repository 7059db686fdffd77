use sha3::{Digest, Keccak256};

use crate::B256;

/// Keccak-256 of `data`, the hash used for headers, code, transactions and trie nodes.
pub fn keccak256(data: impl AsRef<[u8]>) -> B256 {
    B256::from_slice(&Keccak256::digest(data.as_ref()))
}
