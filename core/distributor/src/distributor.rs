use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use lxs_interfaces::{ConfigConsumer, LightPeerConnection};
use lxs_metrics::{histogram, increment_counter};
use lxs_peers::{PeerHandle, PeerRegistry, PeerSnapshot, Reservation};
use lxs_server_pool::{ServerPool, Weight};
use lxs_types::{NodeId, OdrError, OdrReply, WireError};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{AttemptState, AttemptTracker, Config, DistRequest, ExhaustionPolicy};

/// A reply and the peer that sent it. Not verified yet.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub peer: PeerHandle,
    pub reply: OdrReply,
    pub latency: Duration,
}

impl Delivery {
    pub fn peer_id(&self) -> NodeId {
        self.peer.id()
    }
}

enum Dispatch {
    Delivered(Delivery),
    /// The attempt failed, pick the next peer right away.
    Retry,
    /// No peer can take the request at the moment.
    Idle,
    /// Every eligible peer was asked in the current round.
    RoundDone,
    /// The job deadline passed while an attempt was in flight.
    Exhausted,
    Canceled,
}

enum AttemptOutcome {
    Answered(OdrReply),
    TimedOut,
    PeerLost,
    Failed(WireError),
    DeadlineReached,
    Canceled,
}

impl AttemptOutcome {
    fn state(&self) -> (AttemptState, &'static str) {
        match self {
            AttemptOutcome::Answered(_) => (AttemptState::Answered, "answered"),
            AttemptOutcome::TimedOut => (AttemptState::TimedOut, "timeout"),
            AttemptOutcome::PeerLost => (AttemptState::PeerLost, "peer_lost"),
            AttemptOutcome::Failed(_) => (AttemptState::Failed, "failed"),
            AttemptOutcome::DeadlineReached => (AttemptState::Canceled, "deadline"),
            AttemptOutcome::Canceled => (AttemptState::Canceled, "canceled"),
        }
    }
}

/// Hands requests to live peers, one attempt at a time.
pub struct RequestDistributor {
    config: Config,
    registry: Arc<PeerRegistry>,
    pool: Arc<ServerPool>,
}

impl ConfigConsumer for RequestDistributor {
    const KEY: &'static str = "distributor";

    type Config = Config;
}

impl RequestDistributor {
    pub fn new(config: Config, registry: Arc<PeerRegistry>, pool: Arc<ServerPool>) -> Self {
        Self {
            config,
            registry,
            pool,
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// Eligible peers outside of `exclude` in the order they should be asked: least loaded
    /// first, then the better reputation. Peers in cooldown are left out.
    pub fn rank(&self, request: &DistRequest, exclude: &HashSet<NodeId>) -> Vec<PeerSnapshot> {
        self.rank_by(|peer| request.is_eligible(peer), exclude)
    }

    /// Same ordering as [`Self::rank`] for anything that is not an [`DistRequest`].
    pub fn rank_by<P>(&self, eligible: P, exclude: &HashSet<NodeId>) -> Vec<PeerSnapshot>
    where
        P: Fn(&PeerSnapshot) -> bool,
    {
        let mut ranked: Vec<(PeerSnapshot, f64)> = Vec::new();
        self.registry.for_each(
            |peer| {
                !exclude.contains(&peer.id())
                    && eligible(peer)
                    && !self.pool.is_excluded(&peer.id())
            },
            |peer| {
                let quality = self.pool.quality(&peer.id());
                ranked.push((peer, quality));
            },
        );
        ranked.sort_by(|(a, qa), (b, qb)| {
            a.load()
                .total_cmp(&b.load())
                .then_with(|| qb.total_cmp(qa))
                .then_with(|| a.id().cmp(&b.id()))
        });
        ranked.into_iter().map(|(peer, _)| peer).collect()
    }

    /// Distribute with no limit on attempts, until a peer answers or `cancel` fires.
    pub async fn send(
        &self,
        request: &DistRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, OdrError> {
        let mut tracker = AttemptTracker::new(ExhaustionPolicy::unbounded());
        self.distribute(request, &mut tracker, cancel).await
    }

    /// Get an answer to `request` from some eligible peer.
    ///
    /// Peers that time out, fail or disconnect are reported to the server pool and the
    /// request moves on to the next one. When no peer can take the request, or every
    /// eligible peer was already asked, the call waits for the registry to change or for
    /// the recheck interval before asking again. It only ever returns with a reply, on cancellation, or
    /// when the tracker's policy is exhausted. Every reservation taken is released before
    /// returning, or when the returned future is dropped.
    pub async fn distribute(
        &self,
        request: &DistRequest,
        tracker: &mut AttemptTracker,
        cancel: &CancellationToken,
    ) -> Result<Delivery, OdrError> {
        let mut changes = self.registry.subscribe_changes();
        let kind = request.request.kind();

        loop {
            if cancel.is_cancelled() {
                return Err(OdrError::Canceled);
            }
            if tracker.is_exhausted(Instant::now()) {
                return Err(OdrError::RetrievalExhausted {
                    attempts: tracker.attempts(),
                });
            }

            // Anything changing from here on wakes the wait below.
            changes.borrow_and_update();

            match self.try_dispatch(request, tracker, cancel).await {
                Dispatch::Delivered(delivery) => return Ok(delivery),
                Dispatch::Retry => continue,
                Dispatch::Canceled => return Err(OdrError::Canceled),
                Dispatch::Exhausted => {
                    return Err(OdrError::RetrievalExhausted {
                        attempts: tracker.attempts(),
                    })
                },
                Dispatch::Idle => {
                    trace!(kind = %kind, "{}, waiting", OdrError::NoEligiblePeer);
                    self.wait_for_change(&mut changes, tracker.policy().deadline, cancel)
                        .await?;
                },
                Dispatch::RoundDone => {
                    trace!(kind = %kind, attempts = tracker.attempts(), "every eligible peer was asked, waiting");
                    self.wait_for_change(&mut changes, tracker.policy().deadline, cancel)
                        .await?;
                    tracker.new_round();
                },
            }
        }
    }

    /// Run one attempt on the best peer that has room for the request.
    async fn try_dispatch(
        &self,
        request: &DistRequest,
        tracker: &mut AttemptTracker,
        cancel: &CancellationToken,
    ) -> Dispatch {
        let ranked = self.rank(request, tracker.tried());
        if ranked.is_empty()
            && !tracker.tried().is_empty()
            && !self.rank(request, &HashSet::new()).is_empty()
        {
            return Dispatch::RoundDone;
        }

        for peer in ranked {
            let cost = request.cost_for(&peer);
            let Some(reservation) = self.registry.reserve(&peer.handle, cost) else {
                continue;
            };
            let Some(connection) = self.registry.connection(&peer.handle) else {
                continue;
            };
            return self
                .attempt(request, tracker, peer.handle, connection, reservation, cancel)
                .await;
        }

        Dispatch::Idle
    }

    async fn attempt(
        &self,
        request: &DistRequest,
        tracker: &mut AttemptTracker,
        peer: PeerHandle,
        connection: Arc<dyn LightPeerConnection>,
        reservation: Reservation,
        cancel: &CancellationToken,
    ) -> Dispatch {
        let kind = request.request.kind();
        let id = peer.id();
        let index = tracker.begin(id);
        tracker.transition(index, AttemptState::Sent);
        trace!(peer = %id, kind = %kind, cost = reservation.cost(), "sending request");

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => AttemptOutcome::Canceled,
            _ = deadline_reached(tracker.policy().deadline) => AttemptOutcome::DeadlineReached,
            _ = peer.lost() => AttemptOutcome::PeerLost,
            reply = tokio::time::timeout(
                self.config.request_timeout,
                connection.request(request.request.clone()),
            ) => match reply {
                Ok(Ok(reply)) => AttemptOutcome::Answered(reply),
                Ok(Err(e)) => AttemptOutcome::Failed(e),
                Err(_) => AttemptOutcome::TimedOut,
            },
        };
        let latency = started.elapsed();
        drop(reservation);

        let (state, label) = outcome.state();
        tracker.transition(index, state);
        increment_counter!(
            "distributor_attempts",
            Some("Request attempts by outcome"),
            "kind" => kind.as_str(),
            "outcome" => label
        );

        match outcome {
            AttemptOutcome::Answered(reply) => {
                self.pool
                    .record_interaction(id, true, Weight::Weak, Some(latency));
                histogram!(
                    "distributor_request_latency",
                    Some("Time until a peer answered a request, in seconds"),
                    latency.as_secs_f64(),
                    "kind" => kind.as_str()
                );
                Dispatch::Delivered(Delivery {
                    peer,
                    reply,
                    latency,
                })
            },
            AttemptOutcome::TimedOut => {
                self.pool.record_interaction(id, false, Weight::Strong, None);
                debug!(kind = %kind, "{}", OdrError::AttemptTimeout(id));
                Dispatch::Retry
            },
            AttemptOutcome::PeerLost => {
                self.pool.record_interaction(id, false, Weight::Weak, None);
                debug!(peer = %id, kind = %kind, "peer lost during request, requeueing");
                Dispatch::Retry
            },
            AttemptOutcome::Failed(e) => {
                self.pool.record_interaction(id, false, Weight::Weak, None);
                debug!(peer = %id, kind = %kind, "request failed: {e}");
                Dispatch::Retry
            },
            // Not the peer's fault, nothing to report.
            AttemptOutcome::DeadlineReached => {
                debug!(peer = %id, kind = %kind, "job deadline reached during request");
                Dispatch::Exhausted
            },
            AttemptOutcome::Canceled => Dispatch::Canceled,
        }
    }

    async fn wait_for_change(
        &self,
        changes: &mut watch::Receiver<u64>,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<(), OdrError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OdrError::Canceled),
            _ = deadline_reached(deadline) => Ok(()),
            _ = changes.changed() => Ok(()),
            _ = tokio::time::sleep(self.config.recheck_interval) => Ok(()),
        }
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
