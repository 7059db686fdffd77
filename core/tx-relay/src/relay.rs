use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::future::join_all;
use lru::LruCache;
use lxs_distributor::RequestDistributor;
use lxs_interfaces::ConfigConsumer;
use lxs_metrics::increment_counter_by;
use lxs_server_pool::Weight;
use lxs_types::{keccak256, Bytes, NodeId, RequestKind, WireError, B256};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::Config;

/// What happened to a relayed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayReport {
    pub hash: B256,
    /// Servers the transaction was handed to by this call.
    pub sent_to: Vec<NodeId>,
    /// The transaction still has fewer servers than the fanout and will be sent again
    /// when new servers show up.
    pub pending: bool,
}

struct Tracked {
    tx: Bytes,
    /// Servers that got the transaction, or are getting it right now.
    peers: HashSet<NodeId>,
}

/// Hands locally created transactions to several servers. Nothing is verified and no
/// acknowledgement is awaited beyond the write itself.
pub struct TxRelay {
    config: Config,
    distributor: Arc<RequestDistributor>,
    tracked: Mutex<LruCache<B256, Tracked>>,
}

impl ConfigConsumer for TxRelay {
    const KEY: &'static str = "tx-relay";

    type Config = Config;
}

impl TxRelay {
    pub fn new(config: Config, distributor: Arc<RequestDistributor>) -> Self {
        let capacity = NonZeroUsize::new(config.max_tracked).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            distributor,
            tracked: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Send `tx` to up to `fanout` servers that do not have it yet.
    pub async fn relay(&self, tx: Bytes) -> RelayReport {
        let hash = keccak256(&tx);
        self.tracked.lock().get_or_insert_mut(hash, || Tracked {
            tx: tx.clone(),
            peers: HashSet::new(),
        });

        let sent_to = self.broadcast(hash, &tx).await;
        let pending = self.is_pending(&hash);
        if pending {
            debug!(tx = %hash, sent = sent_to.len(), "transaction is short of servers, keeping it");
        }
        RelayReport {
            hash,
            sent_to,
            pending,
        }
    }

    /// Forget transactions that no longer need relaying, usually because they were
    /// included in a block.
    pub fn discard(&self, hashes: &[B256]) {
        let mut tracked = self.tracked.lock();
        for hash in hashes {
            tracked.pop(hash);
        }
    }

    /// Servers that have been handed the transaction.
    pub fn sent_to(&self, hash: &B256) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self
            .tracked
            .lock()
            .peek(hash)
            .map(|tracked| tracked.peers.iter().copied().collect())
            .unwrap_or_default();
        peers.sort();
        peers
    }

    /// Transactions that have not reached `fanout` servers yet.
    pub fn pending(&self) -> Vec<B256> {
        self.tracked
            .lock()
            .iter()
            .filter(|(_, tracked)| tracked.peers.len() < self.config.fanout)
            .map(|(hash, _)| *hash)
            .collect()
    }

    pub fn tracked(&self) -> usize {
        self.tracked.lock().len()
    }

    /// Re-broadcast pending transactions whenever the set of servers changes, until
    /// `shutdown` fires. Rounds are at least `rebroadcast_interval` apart.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut changes = self.distributor.registry().subscribe_changes();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.rebroadcast().await;
                },
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.rebroadcast_interval) => {},
            }
        }
        info!("transaction relay shut down");
    }

    /// Send every pending transaction to servers it has not reached yet.
    pub async fn rebroadcast(&self) -> usize {
        let pending: Vec<(B256, Bytes)> = self
            .tracked
            .lock()
            .iter()
            .filter(|(_, tracked)| tracked.peers.len() < self.config.fanout)
            .map(|(hash, tracked)| (*hash, tracked.tx.clone()))
            .collect();

        let mut sent = 0;
        for (hash, tx) in pending {
            sent += self.broadcast(hash, &tx).await.len();
        }
        if sent > 0 {
            debug!(sent, "re-broadcast pending transactions");
        }
        sent
    }

    fn is_pending(&self, hash: &B256) -> bool {
        self.tracked
            .lock()
            .peek(hash)
            .map(|tracked| tracked.peers.len() < self.config.fanout)
            .unwrap_or(false)
    }

    async fn broadcast(&self, hash: B256, tx: &Bytes) -> Vec<NodeId> {
        let Some(exclude) = self
            .tracked
            .lock()
            .peek(&hash)
            .map(|tracked| tracked.peers.clone())
        else {
            return Vec::new();
        };
        let wanted = self.config.fanout.saturating_sub(exclude.len());
        if wanted == 0 {
            return Vec::new();
        }

        let registry = self.distributor.registry();
        let ranked = self
            .distributor
            .rank_by(|peer| peer.serves(RequestKind::Transactions), &exclude);

        let mut claimed = Vec::with_capacity(wanted);
        let mut sends = Vec::with_capacity(wanted);
        for peer in ranked {
            if sends.len() == wanted {
                break;
            }
            let cost = peer.costs.cost(RequestKind::Transactions, 1);
            let Some(reservation) = registry.reserve(&peer.handle, cost) else {
                continue;
            };
            let Some(connection) = registry.connection(&peer.handle) else {
                continue;
            };
            let id = peer.id();
            claimed.push(id);
            let tx = tx.clone();
            let timeout = self.config.send_timeout;
            sends.push(async move {
                let result = tokio::time::timeout(timeout, connection.send_transactions(vec![tx]))
                    .await
                    .unwrap_or(Err(WireError::Disconnected));
                (id, result, reservation)
            });
        }
        if sends.is_empty() {
            return Vec::new();
        }

        // Claim the peers before sending so a concurrent broadcast of the same
        // transaction picks others.
        {
            let mut tracked = self.tracked.lock();
            let Some(entry) = tracked.peek_mut(&hash) else {
                return Vec::new();
            };
            entry.peers.extend(claimed.iter().copied());
        }
        trace!(tx = %hash, peers = claimed.len(), "relaying transaction");

        let mut sent_to = Vec::new();
        let mut failed = Vec::new();
        let mut reservations = Vec::new();
        for (id, result, reservation) in join_all(sends).await {
            reservations.push(reservation);
            match result {
                Ok(()) => sent_to.push(id),
                Err(e) => {
                    debug!(peer = %id, tx = %hash, "failed to send transaction: {e}");
                    self.distributor
                        .pool()
                        .record_interaction(id, false, Weight::Weak, None);
                    failed.push(id);
                },
            }
        }

        if !failed.is_empty() {
            if let Some(entry) = self.tracked.lock().peek_mut(&hash) {
                for id in &failed {
                    entry.peers.remove(id);
                }
            }
        }
        // Releasing wakes the re-broadcast loop, which must see the failed peers as
        // available again.
        drop(reservations);
        increment_counter_by!(
            sent_to.len() as u64,
            "tx_relay_sent",
            Some("Transactions handed to servers by result"),
            "result" => "sent"
        );
        increment_counter_by!(
            failed.len() as u64,
            "tx_relay_sent",
            Some("Transactions handed to servers by result"),
            "result" => "failed"
        );
        sent_to.sort();
        sent_to
    }
}
