mod cost;
mod error;
mod hash;
mod peer;
mod request;

pub use alloy_primitives::{Bytes, B256, U256};
pub use cost::*;
pub use error::*;
pub use hash::keccak256;
pub use peer::*;
pub use request::*;

/// Block height.
pub type BlockNumber = u64;

/// First light protocol version. Serves headers, bodies, receipts, proofs and code.
pub const LPV1: u32 = 1;

/// Second light protocol version. Adds canonical-hash-trie and bloom-trie proofs.
pub const LPV2: u32 = 2;
