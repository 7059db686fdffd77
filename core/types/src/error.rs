use crate::{NodeId, RequestKind, B256};

/// Errors crossing the boundary of the on-demand retrieval core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OdrError {
    #[error("peer {0} is already registered")]
    DuplicatePeer(NodeId),
    #[error("no eligible peer for the request")]
    NoEligiblePeer,
    #[error("peer {0} did not answer in time")]
    AttemptTimeout(NodeId),
    #[error("reply from peer {peer} failed verification: {reason}")]
    VerificationFailed { peer: NodeId, reason: VerifyError },
    #[error("retrieval exhausted after {attempts} attempts")]
    RetrievalExhausted { attempts: usize },
    #[error("no trust anchor covers {kind} section {section}")]
    UnknownTrustAnchor { kind: RequestKind, section: u64 },
    #[error("request canceled")]
    Canceled,
    /// A bug in the retrieval core itself, never caused by a peer or the caller.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OdrError {
    /// Whether the error is final for the caller, as opposed to absorbed and retried internally.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OdrError::RetrievalExhausted { .. }
                | OdrError::UnknownTrustAnchor { .. }
                | OdrError::Canceled
                | OdrError::Internal(_)
        )
    }
}

/// Failures of the per-peer wire primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("peer disconnected")]
    Disconnected,
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Why a reply was not accepted. Always blamed on the peer that sent it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("expected a {expected} reply, got {got}")]
    UnexpectedReply {
        expected: RequestKind,
        got: RequestKind,
    },
    #[error("hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: B256, got: B256 },
    #[error("invalid proof: {0}")]
    InvalidProof(String),
    #[error("malformed reply: {0}")]
    Malformed(String),
}
