use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use lru::LruCache;
use lxs_interfaces::{ConfigConsumer, Dialer};
use lxs_metrics::increment_counter;
use lxs_peers::PeerRegistry;
use lxs_types::{NodeId, ServerAddr, WireError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{Config, DialState, ServerRecord, Weight};

/// Known light servers: where to reach them and how well they served us.
pub struct ServerPool {
    pub(crate) config: Config,
    registry: Arc<PeerRegistry>,
    /// Reputation per identity. Updates to one record are serialized by the map, updates
    /// to different records run in parallel.
    pub(crate) records: scc::HashMap<NodeId, ServerRecord>,
    pub(crate) candidates: Mutex<LruCache<NodeId, Candidate>>,
}

#[derive(Clone, Debug)]
pub(crate) struct Candidate {
    pub addr: ServerAddr,
    pub dial: DialState,
}

impl ConfigConsumer for ServerPool {
    const KEY: &'static str = "server-pool";

    type Config = Config;
}

impl ServerPool {
    pub fn new(config: Config, registry: Arc<PeerRegistry>) -> Self {
        let capacity = NonZeroUsize::new(config.max_known_servers).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            registry,
            records: scc::HashMap::default(),
            candidates: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Remember an address learned from discovery. Known addresses keep their backoff.
    pub fn add_candidate(&self, addr: ServerAddr) {
        let mut candidates = self.candidates.lock();
        let candidate = candidates.get_or_insert_mut(addr.id, || Candidate {
            addr,
            dial: DialState::default(),
        });
        candidate.addr = addr;
    }

    pub fn candidates(&self) -> usize {
        self.candidates.lock().len()
    }

    /// Up to `n` servers worth dialing, best first.
    ///
    /// Skips servers that are connected, backing off or in cooldown. Never waits, an empty
    /// result means there is nothing to dial right now.
    pub fn suggest_peers(&self, n: usize) -> Vec<ServerAddr> {
        self.suggest_peers_at(n, SystemTime::now())
    }

    pub(crate) fn suggest_peers_at(&self, n: usize, now: SystemTime) -> Vec<ServerAddr> {
        if n == 0 {
            return Vec::new();
        }
        let dialable: Vec<ServerAddr> = self
            .candidates
            .lock()
            .iter()
            .filter(|(_, candidate)| candidate.dial.can_dial(now))
            .map(|(_, candidate)| candidate.addr)
            .collect();

        let mut ranked: Vec<(ServerAddr, f64, Option<SystemTime>)> = dialable
            .into_iter()
            .filter(|addr| !self.registry.contains(&addr.id))
            .filter_map(|addr| {
                let (excluded, score, last_success) = self
                    .records
                    .read(&addr.id, |_, record| {
                        (
                            record.is_excluded(now),
                            record.score(&self.config),
                            record.last_success,
                        )
                    })
                    .unwrap_or_else(|| (false, self.fresh_score(), None));
                (!excluded).then_some((addr, score, last_success))
            })
            .collect();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.2.cmp(&a.2)));
        ranked.truncate(n);
        ranked.into_iter().map(|(addr, _, _)| addr).collect()
    }

    /// Record the end of a request. Failures without more context count as strong
    /// evidence, successes as weak.
    pub fn record_outcome(&self, peer: NodeId, success: bool, latency: Option<Duration>) {
        let weight = if success { Weight::Weak } else { Weight::Strong };
        self.record_interaction(peer, success, weight, latency);
    }

    pub fn record_interaction(
        &self,
        peer: NodeId,
        success: bool,
        weight: Weight,
        latency: Option<Duration>,
    ) {
        let now = SystemTime::now();
        self.with_record(peer, now, |record, config| {
            record.update(success, weight, latency, config, now)
        });
    }

    /// The peer sent a reply that failed verification.
    pub fn record_invalid(&self, peer: NodeId) {
        let now = SystemTime::now();
        let excluded = self.with_record(peer, now, |record, config| {
            record.update(false, Weight::Provable, None, config, now);
            record.strike(config, now)
        });
        if excluded == Some(true) {
            warn!(peer = %peer, cooldown = ?self.config.strike_cooldown, "excluding server after repeated invalid replies");
            increment_counter!("server_pool_exclusions", Some("Servers put in cooldown for invalid replies"));
        }
    }

    /// A reply of the peer was verified, forgive earlier strikes.
    pub fn record_verified(&self, peer: NodeId) {
        self.records.update(&peer, |_, record| record.strikes = 0);
    }

    pub fn record_dial_result(&self, addr: &ServerAddr, success: bool) {
        self.record_dial_result_at(addr, success, SystemTime::now())
    }

    pub(crate) fn record_dial_result_at(&self, addr: &ServerAddr, success: bool, now: SystemTime) {
        {
            let mut candidates = self.candidates.lock();
            let candidate = candidates.get_or_insert_mut(addr.id, || Candidate {
                addr: *addr,
                dial: DialState::default(),
            });
            candidate.dial.record(
                success,
                self.config.dial_backoff_base,
                self.config.dial_backoff_max,
                now,
            );
        }
        if success {
            self.with_record(addr.id, now, |record, _| record.last_seen = now);
        }
        let result = if success { "success" } else { "failure" };
        increment_counter!("server_pool_dials", Some("Dial attempts to light servers"), "result" => result);
    }

    /// Rank used to order peers for requests. Unknown peers get the rank of a fresh
    /// record.
    pub fn quality(&self, peer: &NodeId) -> f64 {
        self.score_of(peer).unwrap_or_else(|| self.fresh_score())
    }

    pub fn score_of(&self, peer: &NodeId) -> Option<f64> {
        self.records
            .read(peer, |_, record| record.score(&self.config))
    }

    pub fn record(&self, peer: &NodeId) -> Option<ServerRecord> {
        self.records.read(peer, |_, record| record.clone())
    }

    pub fn is_excluded(&self, peer: &NodeId) -> bool {
        let now = SystemTime::now();
        self.records
            .read(peer, |_, record| record.is_excluded(now))
            .unwrap_or(false)
    }

    pub fn known_servers(&self) -> usize {
        self.records.len()
    }

    fn fresh_score(&self) -> f64 {
        ServerRecord::new(&self.config, SystemTime::now()).score(&self.config)
    }

    fn with_record<R>(
        &self,
        peer: NodeId,
        now: SystemTime,
        f: impl FnOnce(&mut ServerRecord, &Config) -> R,
    ) -> Option<R> {
        if !self.records.contains(&peer) {
            self.make_room();
            let _ = self
                .records
                .insert(peer, ServerRecord::new(&self.config, now));
        }
        self.records
            .update(&peer, |_, record| f(record, &self.config))
    }

    /// Evict the least recently seen records until a new one fits.
    pub(crate) fn make_room(&self) {
        let capacity = self.config.max_known_servers.max(1);
        while self.records.len() >= capacity {
            let mut oldest: Option<(NodeId, SystemTime)> = None;
            self.records.scan(|id, record| {
                if oldest.map_or(true, |(_, seen)| record.last_seen < seen) {
                    oldest = Some((*id, record.last_seen));
                }
            });
            let Some((id, _)) = oldest else {
                return;
            };
            debug!(peer = %id, "evicting server record");
            self.records.remove(&id);
        }
    }

    /// Keep dialing suggested servers until `shutdown` fires.
    ///
    /// Discovered addresses are fed in through `discovery`. Every `dial_interval` the pool
    /// tops the connection count up to `target_peers`.
    pub async fn run(
        self: Arc<Self>,
        mut discovery: mpsc::Receiver<ServerAddr>,
        dialer: Arc<dyn Dialer>,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.dial_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut dials: JoinSet<(ServerAddr, Result<(), WireError>)> = JoinSet::new();
        let mut dialing: HashSet<NodeId> = HashSet::new();
        let mut discovery_open = true;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(joined) = dials.join_next() => match joined {
                    Ok((addr, result)) => {
                        dialing.remove(&addr.id);
                        if let Err(e) = &result {
                            debug!(peer = %addr.id, addr = %addr.addr, "dial failed: {e}");
                        }
                        self.record_dial_result(&addr, result.is_ok());
                    },
                    Err(e) => error!("dial task failed: {e:?}"),
                },
                addr = discovery.recv(), if discovery_open => match addr {
                    Some(addr) => self.add_candidate(addr),
                    None => {
                        info!("discovery source closed");
                        discovery_open = false;
                    },
                },
                _ = ticker.tick() => {
                    let busy = self.registry.len() + dialing.len();
                    let wanted = self.config.target_peers.saturating_sub(busy);
                    // Servers still being dialed show up as suggestions too.
                    let mut started = 0;
                    for addr in self.suggest_peers(wanted + dialing.len()) {
                        if started == wanted {
                            break;
                        }
                        if !dialing.insert(addr.id) {
                            continue;
                        }
                        started += 1;
                        let dialer = dialer.clone();
                        dials.spawn(async move { (addr, dialer.dial(addr).await) });
                    }
                },
            }
        }

        dials.shutdown().await;
    }
}
