use async_trait::async_trait;
use lxs_types::{ServerAddr, WireError};

/// Asks the p2p layer to open a session with a server. A successful dial ends with the
/// session being registered in the peer registry by the protocol handler.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, server: ServerAddr) -> Result<(), WireError>;
}
