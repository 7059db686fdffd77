use async_trait::async_trait;
use lxs_types::{Bytes, OdrReply, OdrRequest, WireError};

/// The send/receive primitive of a single established light protocol session.
///
/// Framing, flow control buffers and message metering all live behind this trait. A
/// request either resolves with the peer's (unverified) reply or with a [`WireError`];
/// timeouts are enforced by the caller.
#[async_trait]
pub trait LightPeerConnection: Send + Sync + 'static {
    /// Send an on-demand retrieval request and wait for the matching reply.
    async fn request(&self, request: OdrRequest) -> Result<OdrReply, WireError>;

    /// Hand a batch of signed transactions to the peer. Resolves once the message has
    /// been written, there is no acknowledgement.
    async fn send_transactions(&self, transactions: Vec<Bytes>) -> Result<(), WireError>;
}
