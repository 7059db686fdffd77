use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lxs_interfaces::LightPeerConnection;
use lxs_metrics::increment_counter;
use lxs_types::{CostTable, Head, NodeId, OdrError, PeerInfo};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{PeerHandle, PeerSnapshot, Reservation};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Membership and head changes published by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    Registered(NodeId),
    HeadAdvanced(NodeId),
    Lost(NodeId),
}

/// The set of currently connected light servers.
///
/// The peer map sits behind a read/write lock that is only ever held for map lookups, and
/// each peer's mutable state (head and reserved cost) has its own mutex. Neither lock is
/// held across an await point or while calling into a connection.
pub struct PeerRegistry {
    peers: RwLock<HashMap<NodeId, Arc<PeerEntry>>>,
    next_generation: AtomicU64,
    /// Bumped on every change that could make a waiting request distributable.
    changes: Arc<watch::Sender<u64>>,
    events: broadcast::Sender<PeerEvent>,
}

pub(crate) struct PeerEntry {
    id: NodeId,
    generation: u64,
    protocol_version: u32,
    budget: u64,
    costs: CostTable,
    lost: CancellationToken,
    state: Mutex<PeerState>,
    connection: Arc<dyn LightPeerConnection>,
    changes: Arc<watch::Sender<u64>>,
}

struct PeerState {
    head: Head,
    outstanding: u64,
}

impl PeerEntry {
    fn handle(&self) -> PeerHandle {
        PeerHandle {
            id: self.id,
            generation: self.generation,
            lost: self.lost.clone(),
        }
    }

    fn snapshot(&self) -> PeerSnapshot {
        let state = self.state.lock();
        PeerSnapshot {
            handle: self.handle(),
            protocol_version: self.protocol_version,
            head: state.head,
            budget: self.budget,
            outstanding: state.outstanding,
            costs: self.costs,
        }
    }

    pub(crate) fn release(&self, cost: u64) {
        {
            let mut state = self.state.lock();
            state.outstanding = state.outstanding.saturating_sub(cost);
        }
        bump(&self.changes);
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            peers: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            changes: Arc::new(changes),
            events,
        }
    }

    /// Add a peer after its handshake completed.
    pub fn register(
        &self,
        info: PeerInfo,
        connection: Arc<dyn LightPeerConnection>,
    ) -> Result<PeerHandle, OdrError> {
        let handle = {
            let mut peers = self.peers.write();
            if peers.contains_key(&info.id) {
                return Err(OdrError::DuplicatePeer(info.id));
            }
            let entry = Arc::new(PeerEntry {
                id: info.id,
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                protocol_version: info.protocol_version,
                budget: info.budget,
                costs: info.costs,
                lost: CancellationToken::new(),
                state: Mutex::new(PeerState {
                    head: info.head,
                    outstanding: 0,
                }),
                connection,
                changes: self.changes.clone(),
            });
            let handle = entry.handle();
            peers.insert(info.id, entry);
            handle
        };

        info!(peer = %info.id, version = info.protocol_version, head = info.head.number, "registered light server");
        increment_counter!("peers_registered", Some("Light servers registered"));
        self.notify(PeerEvent::Registered(info.id));
        Ok(handle)
    }

    /// Remove a peer. Every handle to it observes the loss before this returns.
    ///
    /// Returns false if the peer was not registered.
    pub fn unregister(&self, id: &NodeId) -> bool {
        let Some(entry) = self.peers.write().remove(id) else {
            return false;
        };
        entry.lost.cancel();

        info!(peer = %id, "unregistered light server");
        increment_counter!("peers_lost", Some("Light servers unregistered"));
        self.notify(PeerEvent::Lost(*id));
        true
    }

    /// Record a head announcement. Heads only ever move forward, stale or reordered
    /// announcements are ignored.
    pub fn announce(&self, id: &NodeId, head: Head) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        {
            let mut state = entry.state.lock();
            if head.number <= state.head.number {
                return false;
            }
            state.head = head;
        }
        debug!(peer = %id, head = head.number, "peer announced new head");
        self.notify(PeerEvent::HeadAdvanced(*id));
        true
    }

    /// Looks the handle up again. `None` if the peer it refers to is gone, even when the
    /// same identity has since reconnected.
    pub fn get(&self, handle: &PeerHandle) -> Option<PeerSnapshot> {
        self.live_entry(handle).map(|entry| entry.snapshot())
    }

    pub fn handle(&self, id: &NodeId) -> Option<PeerHandle> {
        self.entry(id).map(|entry| entry.handle())
    }

    pub fn connection(&self, handle: &PeerHandle) -> Option<Arc<dyn LightPeerConnection>> {
        self.live_entry(handle)
            .map(|entry| entry.connection.clone())
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.peers.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.peers.read().keys().copied().collect()
    }

    /// Snapshot of every registered peer.
    pub fn snapshots(&self) -> Vec<PeerSnapshot> {
        self.entries().iter().map(|entry| entry.snapshot()).collect()
    }

    /// Call `f` on a snapshot of every peer matching `predicate`.
    ///
    /// The map lock is released before the first callback runs, so callbacks may use the
    /// registry (or take their time) without holding up unregistration.
    pub fn for_each<P, F>(&self, predicate: P, mut f: F)
    where
        P: Fn(&PeerSnapshot) -> bool,
        F: FnMut(PeerSnapshot),
    {
        for entry in self.entries() {
            let snapshot = entry.snapshot();
            if predicate(&snapshot) {
                f(snapshot);
            }
        }
    }

    /// Up to `k` matching peers, least loaded first and highest head breaking ties.
    pub fn best_matching<P>(&self, predicate: P, k: usize) -> Vec<PeerSnapshot>
    where
        P: Fn(&PeerSnapshot) -> bool,
    {
        let mut matching = Vec::new();
        self.for_each(predicate, |snapshot| matching.push(snapshot));
        matching.sort_by(|a, b| {
            a.load()
                .total_cmp(&b.load())
                .then_with(|| b.head.number.cmp(&a.head.number))
                .then_with(|| a.id().cmp(&b.id()))
        });
        matching.truncate(k);
        matching
    }

    /// Hold `cost` against the peer's budget.
    ///
    /// A cost larger than the whole budget is clamped to it, so such a request can still
    /// be served by an otherwise idle peer. Returns `None` if the peer is gone, has no
    /// budget at all, or the cost does not fit next to what is already outstanding.
    pub fn reserve(&self, handle: &PeerHandle, cost: u64) -> Option<Reservation> {
        let entry = self.live_entry(handle)?;
        if entry.budget == 0 {
            return None;
        }
        let cost = cost.min(entry.budget);
        {
            let mut state = entry.state.lock();
            let total = state.outstanding.checked_add(cost)?;
            if total > entry.budget || handle.is_lost() {
                return None;
            }
            state.outstanding = total;
        }
        Some(Reservation {
            peer: entry.id,
            cost,
            entry: Arc::downgrade(&entry),
        })
    }

    /// Cost currently reserved against the peer.
    pub fn outstanding(&self, id: &NodeId) -> Option<u64> {
        self.entry(id).map(|entry| entry.state.lock().outstanding)
    }

    /// A receiver that is marked changed whenever a peer joins, advances its head or has
    /// budget released.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    fn entry(&self, id: &NodeId) -> Option<Arc<PeerEntry>> {
        self.peers.read().get(id).cloned()
    }

    fn live_entry(&self, handle: &PeerHandle) -> Option<Arc<PeerEntry>> {
        self.entry(&handle.id)
            .filter(|entry| entry.generation == handle.generation)
    }

    fn entries(&self) -> Vec<Arc<PeerEntry>> {
        self.peers.read().values().cloned().collect()
    }

    fn notify(&self, event: PeerEvent) {
        bump(&self.changes);
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

fn bump(changes: &watch::Sender<u64>) {
    changes.send_modify(|version| *version = version.wrapping_add(1));
}
