use std::fmt;

use crate::{BlockNumber, Bytes, B256, U256};

/// The kinds of data a light server can be asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Header,
    TrieNode,
    Receipts,
    BloomBits,
    Code,
    Transactions,
}

impl RequestKind {
    /// Lowest protocol version able to serve this kind of request.
    pub fn min_protocol_version(&self) -> u32 {
        match self {
            RequestKind::Header | RequestKind::BloomBits => crate::LPV2,
            _ => crate::LPV1,
        }
    }
}

impl RequestKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Header => "header",
            RequestKind::TrieNode => "trie_node",
            RequestKind::Receipts => "receipts",
            RequestKind::BloomBits => "bloom_bits",
            RequestKind::Code => "code",
            RequestKind::Transactions => "transactions",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single on-demand retrieval request as sent on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OdrRequest {
    /// Canonical header at `number`, proven against the CHT of section `cht_section`.
    HeaderByNumber {
        number: BlockNumber,
        cht_section: u64,
    },
    /// Merkle proof for `key` (an already hashed trie path) in the trie rooted at `root`,
    /// which belongs to the state of block `block_hash`.
    TrieProof {
        block_hash: B256,
        root: B256,
        key: B256,
    },
    /// All receipts of the given block.
    Receipts { block_hash: B256 },
    /// Compressed bloom bits vector `bit` of section `section`, proven against the bloom
    /// trie of section `bloom_section`.
    BloomBits {
        bloom_section: u64,
        section: u64,
        bit: u16,
    },
    /// Contract code of `addr_hash` with the given code hash, from the state of
    /// `block_hash`.
    Code {
        block_hash: B256,
        addr_hash: B256,
        code_hash: B256,
    },
}

impl OdrRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            OdrRequest::HeaderByNumber { .. } => RequestKind::Header,
            OdrRequest::TrieProof { .. } => RequestKind::TrieNode,
            OdrRequest::Receipts { .. } => RequestKind::Receipts,
            OdrRequest::BloomBits { .. } => RequestKind::BloomBits,
            OdrRequest::Code { .. } => RequestKind::Code,
        }
    }

    /// Number of items the request asks for, used for cost accounting.
    pub fn amount(&self) -> u64 {
        1
    }
}

/// The answer of a server to an [`OdrRequest`]. Replies are untrusted until verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OdrReply {
    Header {
        header: Bytes,
        td: U256,
        proof: Vec<Bytes>,
    },
    TrieProof {
        value: Option<Bytes>,
        proof: Vec<Bytes>,
    },
    Receipts(Vec<Bytes>),
    BloomBits {
        bits: Bytes,
        proof: Vec<Bytes>,
    },
    Code(Bytes),
}

impl OdrReply {
    pub fn kind(&self) -> RequestKind {
        match self {
            OdrReply::Header { .. } => RequestKind::Header,
            OdrReply::TrieProof { .. } => RequestKind::TrieNode,
            OdrReply::Receipts(_) => RequestKind::Receipts,
            OdrReply::BloomBits { .. } => RequestKind::BloomBits,
            OdrReply::Code(_) => RequestKind::Code,
        }
    }
}
