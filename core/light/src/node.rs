use std::sync::Arc;

use anyhow::{Context, Result};
use lxs_distributor::RequestDistributor;
use lxs_interfaces::{ConfigConsumer, ConfigProviderInterface, Dialer, TrustAnchorProvider};
use lxs_odr::OdrCoordinator;
use lxs_peers::PeerRegistry;
use lxs_retriever::RetrieveManager;
use lxs_server_pool::ServerPool;
use lxs_tx_relay::TxRelay;
use lxs_types::ServerAddr;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capacity of the channel discovery feeds server addresses into.
    pub discovery_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_buffer: 256,
        }
    }
}

/// The on-demand retrieval side of a light node, with every component wired up.
pub struct LightOdrNode {
    config: Config,
    registry: Arc<PeerRegistry>,
    pool: Arc<ServerPool>,
    distributor: Arc<RequestDistributor>,
    retriever: Arc<RetrieveManager>,
    odr: Arc<OdrCoordinator>,
    relay: Arc<TxRelay>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ConfigConsumer for LightOdrNode {
    const KEY: &'static str = "light";

    type Config = Config;
}

impl LightOdrNode {
    /// Build every component from `provider`. Known servers are restored from disk when
    /// the server pool has a `persist_path`.
    pub fn init<P: ConfigProviderInterface>(
        provider: &P,
        anchors: Arc<dyn TrustAnchorProvider>,
    ) -> Result<Self> {
        let registry = Arc::new(PeerRegistry::new());
        let pool = Arc::new(ServerPool::new(provider.get::<ServerPool>(), registry.clone()));
        let restored = pool
            .restore()
            .context("failed to restore known light servers")?;
        if restored > 0 {
            info!("restored {restored} known light servers");
        }

        let distributor = Arc::new(RequestDistributor::new(
            provider.get::<RequestDistributor>(),
            registry.clone(),
            pool.clone(),
        ));
        let retriever = Arc::new(RetrieveManager::new(
            provider.get::<RetrieveManager>(),
            distributor.clone(),
        ));
        let odr = Arc::new(OdrCoordinator::new(
            provider.get::<OdrCoordinator>(),
            retriever.clone(),
            anchors,
        ));
        let relay = Arc::new(TxRelay::new(
            provider.get::<TxRelay>(),
            distributor.clone(),
        ));

        Ok(Self {
            config: provider.get::<Self>(),
            registry,
            pool,
            distributor,
            retriever,
            odr,
            relay,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    /// Start the dial loop and the transaction re-broadcast loop. Returns the sender
    /// discovery hands new server addresses to.
    pub fn start(&mut self, dialer: Arc<dyn Dialer>) -> mpsc::Sender<ServerAddr> {
        let (discovery_tx, discovery_rx) = mpsc::channel(self.config.discovery_buffer.max(1));

        let pool = self.pool.clone();
        let shutdown = self.shutdown.clone();
        self.tasks.push(tokio::spawn(async move {
            pool.run(discovery_rx, dialer, shutdown).await
        }));

        let relay = self.relay.clone();
        let shutdown = self.shutdown.clone();
        self.tasks.push(tokio::spawn(async move { relay.run(shutdown).await }));

        info!("light client started");
        discovery_tx
    }

    /// Stop the background loops and persist what was learned about servers.
    ///
    /// Retrievals that are still running keep going until their own cancellation or
    /// exhaustion, they do not depend on the loops.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("light client task failed: {e:?}");
            }
        }
        self.pool
            .persist()
            .context("failed to persist known light servers")?;
        info!("light client shut down");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    pub fn distributor(&self) -> &Arc<RequestDistributor> {
        &self.distributor
    }

    pub fn retriever(&self) -> &Arc<RetrieveManager> {
        &self.retriever
    }

    pub fn odr(&self) -> &Arc<OdrCoordinator> {
        &self.odr
    }

    pub fn relay(&self) -> &Arc<TxRelay> {
        &self.relay
    }
}
