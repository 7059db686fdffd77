use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{BlockNumber, CostTable, B256};

/// Stable identity of a remote node, independent of the connection it is reached on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(#[serde(with = "hex::serde")] pub [u8; 32]);

impl NodeId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Convenience constructor used mostly by tests and simulations.
    pub fn from_index(index: u32) -> Self {
        let mut bytes = [0; 32];
        bytes[28..].copy_from_slice(&index.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(self.0))
    }
}

/// The chain head a peer has announced to us.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Head {
    pub number: BlockNumber,
    pub hash: B256,
}

impl Head {
    pub const fn new(number: BlockNumber, hash: B256) -> Self {
        Self { number, hash }
    }
}

/// A dialable light server as learned from discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddr {
    pub id: NodeId,
    pub addr: SocketAddr,
}

/// Everything we learn about a server during the handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: NodeId,
    pub protocol_version: u32,
    pub head: Head,
    /// Total request cost this peer is willing to have outstanding from us.
    pub budget: u64,
    /// Per request kind charges announced by the server.
    pub costs: CostTable,
}

impl PeerInfo {
    pub fn new(id: NodeId, protocol_version: u32, head: Head, budget: u64) -> Self {
        Self {
            id,
            protocol_version,
            head,
            budget,
            costs: CostTable::default(),
        }
    }

    pub fn with_costs(mut self, costs: CostTable) -> Self {
        self.costs = costs;
        self
    }
}
