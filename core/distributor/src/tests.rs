use std::sync::Arc;
use std::time::Duration;

use lxs_peers::PeerRegistry;
use lxs_server_pool::ServerPool;
use lxs_test_utils::mock::{Behavior, MockConnection};
use lxs_test_utils::peer_info;
use lxs_types::{Bytes, Head, NodeId, OdrError, OdrReply, OdrRequest, WireError, B256};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    AttemptState,
    AttemptTracker,
    Config,
    Delivery,
    DistRequest,
    ExhaustionPolicy,
    RequestDistributor,
};

fn code_request() -> DistRequest {
    DistRequest::new(OdrRequest::Code {
        block_hash: B256::repeat_byte(1),
        addr_hash: B256::repeat_byte(2),
        code_hash: B256::repeat_byte(3),
    })
}

fn code_reply() -> OdrReply {
    OdrReply::Code(Bytes::from_static(b"\x60\x00"))
}

fn setup() -> Arc<RequestDistributor> {
    setup_with(Config::default())
}

fn setup_with(config: Config) -> Arc<RequestDistributor> {
    lxs_test_utils::logging::try_init();
    let registry = Arc::new(PeerRegistry::new());
    let pool = Arc::new(ServerPool::new(Default::default(), registry.clone()));
    Arc::new(RequestDistributor::new(config, registry, pool))
}

type Outcome = (Result<Delivery, OdrError>, AttemptTracker);

fn spawn_distribute(
    distributor: &Arc<RequestDistributor>,
    request: DistRequest,
    policy: ExhaustionPolicy,
    cancel: CancellationToken,
) -> JoinHandle<Outcome> {
    let distributor = distributor.clone();
    tokio::spawn(async move {
        let mut tracker = AttemptTracker::new(policy);
        let result = distributor.distribute(&request, &mut tracker, &cancel).await;
        (result, tracker)
    })
}

async fn wait_for_requests(connection: &MockConnection, count: usize) {
    while connection.requests() < count {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn states(tracker: &AttemptTracker) -> Vec<(NodeId, AttemptState)> {
    tracker
        .history()
        .iter()
        .map(|attempt| (attempt.peer, attempt.state))
        .collect()
}

#[tokio::test]
async fn test_delivers_reply_and_releases_budget() {
    let distributor = setup();
    let connection = MockConnection::replying(code_reply());
    distributor
        .registry()
        .register(peer_info(1, 100, 5), connection.clone())
        .unwrap();

    let delivery = distributor
        .send(&code_request(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(delivery.peer_id(), NodeId::from_index(1));
    assert_eq!(delivery.reply, code_reply());
    assert_eq!(connection.requests(), 1);
    assert_eq!(distributor.registry().outstanding(&NodeId::from_index(1)), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_peer_lost_requeues_to_next_peer() {
    let distributor = setup();
    let lost = MockConnection::hanging();
    let good = MockConnection::replying(code_reply());
    let registry = distributor.registry().clone();
    registry.register(peer_info(1, 100, 5), lost.clone()).unwrap();
    registry.register(peer_info(2, 100, 5), good.clone()).unwrap();
    let fresh = distributor.pool().quality(&NodeId::from_index(1));

    let task = spawn_distribute(
        &distributor,
        code_request(),
        ExhaustionPolicy::unbounded(),
        CancellationToken::new(),
    );
    wait_for_requests(&lost, 1).await;
    assert!(registry.unregister(&NodeId::from_index(1)));

    let (result, tracker) = task.await.unwrap();
    assert_eq!(result.unwrap().peer_id(), NodeId::from_index(2));
    assert_eq!(
        states(&tracker),
        vec![
            (NodeId::from_index(1), AttemptState::PeerLost),
            (NodeId::from_index(2), AttemptState::Answered),
        ]
    );
    assert!(distributor.pool().quality(&NodeId::from_index(1)) < fresh);
    assert_eq!(good.requests(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_peer_is_never_selected() {
    let distributor = setup();
    let gone = MockConnection::replying(code_reply());
    let registry = distributor.registry().clone();
    registry.register(peer_info(1, 100, 5), gone.clone()).unwrap();
    registry
        .register(peer_info(2, 100, 5), MockConnection::replying(code_reply()))
        .unwrap();
    registry.unregister(&NodeId::from_index(1));

    for _ in 0..5 {
        let delivery = distributor
            .send(&code_request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(delivery.peer_id(), NodeId::from_index(2));
    }
    assert_eq!(gone.requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_moves_to_next_peer() {
    let distributor = setup();
    let registry = distributor.registry().clone();
    registry
        .register(peer_info(1, 100, 5), MockConnection::hanging())
        .unwrap();
    registry
        .register(peer_info(2, 100, 5), MockConnection::replying(code_reply()))
        .unwrap();

    let mut tracker = AttemptTracker::new(ExhaustionPolicy::unbounded());
    let started = Instant::now();
    let delivery = distributor
        .distribute(&code_request(), &mut tracker, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(delivery.peer_id(), NodeId::from_index(2));
    assert!(started.elapsed() >= Config::default().request_timeout);
    assert_eq!(
        states(&tracker),
        vec![
            (NodeId::from_index(1), AttemptState::TimedOut),
            (NodeId::from_index(2), AttemptState::Answered),
        ]
    );
    assert_eq!(registry.outstanding(&NodeId::from_index(1)), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_first_peer_to_connect() {
    let distributor = setup();
    let task = spawn_distribute(
        &distributor,
        code_request().min_head(100),
        ExhaustionPolicy::unbounded(),
        CancellationToken::new(),
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!task.is_finished());

    distributor
        .registry()
        .register(peer_info(7, 120, 5), MockConnection::replying(code_reply()))
        .unwrap();
    let (result, tracker) = task.await.unwrap();
    assert_eq!(result.unwrap().peer_id(), NodeId::from_index(7));
    assert_eq!(tracker.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_waits_until_peer_head_advances() {
    let distributor = setup();
    let connection = MockConnection::replying(code_reply());
    distributor
        .registry()
        .register(peer_info(1, 50, 5), connection.clone())
        .unwrap();

    let task = spawn_distribute(
        &distributor,
        code_request().min_head(100),
        ExhaustionPolicy::unbounded(),
        CancellationToken::new(),
    );
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!task.is_finished());
    assert_eq!(connection.requests(), 0);

    distributor
        .registry()
        .announce(&NodeId::from_index(1), Head::new(100, B256::repeat_byte(9)));
    let (result, _) = task.await.unwrap();
    assert_eq!(result.unwrap().peer_id(), NodeId::from_index(1));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_yields_canceled() {
    let distributor = setup();
    distributor
        .registry()
        .register(peer_info(1, 50, 5), MockConnection::replying(code_reply()))
        .unwrap();

    let cancel = CancellationToken::new();
    let task = spawn_distribute(
        &distributor,
        code_request().min_head(100),
        ExhaustionPolicy::unbounded(),
        cancel.clone(),
    );
    tokio::time::sleep(Duration::from_secs(3)).await;
    cancel.cancel();

    let (result, tracker) = task.await.unwrap();
    assert_eq!(result.unwrap_err(), OdrError::Canceled);
    assert_eq!(tracker.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_in_flight_releases_reservation() {
    let distributor = setup();
    let connection = MockConnection::hanging();
    let registry = distributor.registry().clone();
    registry.register(peer_info(1, 100, 5), connection.clone()).unwrap();

    let cancel = CancellationToken::new();
    let task = spawn_distribute(
        &distributor,
        code_request(),
        ExhaustionPolicy::unbounded(),
        cancel.clone(),
    );
    wait_for_requests(&connection, 1).await;
    assert_eq!(registry.outstanding(&NodeId::from_index(1)), Some(1));

    cancel.cancel();
    let (result, tracker) = task.await.unwrap();
    assert_eq!(result.unwrap_err(), OdrError::Canceled);
    assert_eq!(
        states(&tracker),
        vec![(NodeId::from_index(1), AttemptState::Canceled)]
    );
    assert_eq!(registry.outstanding(&NodeId::from_index(1)), Some(0));
    // Cancellation is not held against the peer.
    assert!(distributor.pool().record(&NodeId::from_index(1)).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_future_releases_reservation() {
    let distributor = setup();
    let connection = MockConnection::hanging();
    let registry = distributor.registry().clone();
    registry.register(peer_info(1, 100, 5), connection.clone()).unwrap();

    let task = spawn_distribute(
        &distributor,
        code_request(),
        ExhaustionPolicy::unbounded(),
        CancellationToken::new(),
    );
    wait_for_requests(&connection, 1).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(registry.outstanding(&NodeId::from_index(1)), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_exhausts_after_max_attempts() {
    let distributor = setup();
    let registry = distributor.registry().clone();
    for index in 1..=2 {
        registry
            .register(
                peer_info(index, 100, 5),
                MockConnection::failing(WireError::Rejected("busy".into())),
            )
            .unwrap();
    }

    let mut tracker = AttemptTracker::new(ExhaustionPolicy::new(3, None));
    let err = distributor
        .distribute(&code_request(), &mut tracker, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, OdrError::RetrievalExhausted { attempts: 3 });
    assert!(tracker
        .history()
        .iter()
        .all(|attempt| attempt.state == AttemptState::Failed));
    // Both peers were asked before anyone was asked twice.
    assert_ne!(tracker.history()[0].peer, tracker.history()[1].peer);
}

#[tokio::test(start_paused = true)]
async fn test_failing_peer_is_asked_again_only_after_recheck() {
    let distributor = setup();
    let flaky = MockConnection::failing(WireError::Disconnected);
    distributor
        .registry()
        .register(peer_info(1, 100, 5), flaky.clone())
        .unwrap();

    let cancel = CancellationToken::new();
    let task = spawn_distribute(
        &distributor,
        code_request(),
        ExhaustionPolicy::unbounded(),
        cancel.clone(),
    );
    tokio::time::sleep(Duration::from_millis(2500)).await;
    cancel.cancel();

    let (result, tracker) = task.await.unwrap();
    assert_eq!(result.unwrap_err(), OdrError::Canceled);
    // Once right away, then once per recheck interval.
    assert_eq!(flaky.requests(), 3);
    assert_eq!(tracker.attempts(), 3);
    assert_eq!(distributor.registry().outstanding(&NodeId::from_index(1)), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_single_failing_peer_does_not_burn_all_attempts_at_once() {
    let distributor = setup();
    distributor
        .registry()
        .register(
            peer_info(1, 100, 5),
            MockConnection::failing(WireError::Disconnected),
        )
        .unwrap();

    let started = Instant::now();
    let mut tracker = AttemptTracker::new(ExhaustionPolicy::new(8, None));
    let err = distributor
        .distribute(&code_request(), &mut tracker, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err, OdrError::RetrievalExhausted { attempts: 8 });
    assert!(started.elapsed() >= Config::default().recheck_interval * 7);
}

#[tokio::test(start_paused = true)]
async fn test_new_peer_ends_the_wait_between_rounds() {
    let distributor = setup();
    let flaky = MockConnection::failing(WireError::Disconnected);
    let registry = distributor.registry().clone();
    registry.register(peer_info(1, 100, 5), flaky.clone()).unwrap();

    let started = Instant::now();
    let task = spawn_distribute(
        &distributor,
        code_request(),
        ExhaustionPolicy::unbounded(),
        CancellationToken::new(),
    );
    wait_for_requests(&flaky, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    registry
        .register(peer_info(2, 100, 5), MockConnection::replying(code_reply()))
        .unwrap();

    let (result, tracker) = task.await.unwrap();
    assert_eq!(result.unwrap().peer_id(), NodeId::from_index(2));
    assert!(started.elapsed() < Config::default().recheck_interval);
    assert_eq!(flaky.requests(), 1);
    assert_eq!(
        states(&tracker),
        vec![
            (NodeId::from_index(1), AttemptState::Failed),
            (NodeId::from_index(2), AttemptState::Answered),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cuts_attempt_in_flight_short() {
    let distributor = setup();
    let connection = MockConnection::hanging();
    let registry = distributor.registry().clone();
    registry.register(peer_info(1, 100, 5), connection.clone()).unwrap();

    let started = Instant::now();
    let deadline = started + Duration::from_secs(1);
    let mut tracker = AttemptTracker::new(ExhaustionPolicy::new(8, Some(deadline)));
    let err = distributor
        .distribute(&code_request(), &mut tracker, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err, OdrError::RetrievalExhausted { attempts: 1 });
    assert!(started.elapsed() < Config::default().request_timeout);
    assert!(Instant::now() >= deadline);
    assert_eq!(
        states(&tracker),
        vec![(NodeId::from_index(1), AttemptState::Canceled)]
    );
    assert_eq!(registry.outstanding(&NodeId::from_index(1)), Some(0));
    // Running out of time is not held against the peer.
    assert!(distributor.pool().record(&NodeId::from_index(1)).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_exhausts_waiting_request() {
    let distributor = setup();
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut tracker = AttemptTracker::new(ExhaustionPolicy::new(10, Some(deadline)));
    let err = distributor
        .distribute(&code_request(), &mut tracker, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, OdrError::RetrievalExhausted { attempts: 0 });
    assert!(Instant::now() >= deadline);
}

#[tokio::test(start_paused = true)]
async fn test_full_peer_is_used_once_budget_frees_up() {
    let distributor = setup();
    let registry = distributor.registry().clone();
    let handle = registry
        .register(peer_info(1, 100, 1), MockConnection::replying(code_reply()))
        .unwrap();
    let held = registry.reserve(&handle, 1).unwrap();

    let task = spawn_distribute(
        &distributor,
        code_request(),
        ExhaustionPolicy::unbounded(),
        CancellationToken::new(),
    );
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!task.is_finished());

    drop(held);
    let (result, _) = task.await.unwrap();
    assert!(result.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_rank_prefers_idle_then_reputable_peers() {
    let distributor = setup();
    let registry = distributor.registry().clone();
    for index in 1..=3 {
        registry
            .register(peer_info(index, 100, 4), MockConnection::hanging())
            .unwrap();
    }
    distributor
        .pool()
        .record_outcome(NodeId::from_index(3), true, Some(Duration::from_millis(5)));
    let busy = registry.handle(&NodeId::from_index(2)).unwrap();
    let _held = registry.reserve(&busy, 1).unwrap();

    let ranked: Vec<_> = distributor
        .rank(&code_request(), &Default::default())
        .iter()
        .map(|peer| peer.id())
        .collect();
    assert_eq!(
        ranked,
        vec![NodeId::from_index(3), NodeId::from_index(1), NodeId::from_index(2)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_random_outcomes_keep_reservations_balanced() {
    let distributor = setup_with(Config {
        request_timeout: Duration::from_millis(200),
        recheck_interval: Duration::from_millis(50),
    });
    let registry = distributor.registry().clone();
    let rng = Arc::new(Mutex::new(SmallRng::seed_from_u64(42)));

    for index in 1..=3 {
        let rng = rng.clone();
        let connection = MockConnection::new(move |_| {
            let mut rng = rng.lock();
            match rng.gen_range(0..4) {
                0 => Behavior::Hang,
                1 => Behavior::Fail(WireError::Disconnected),
                _ => Behavior::Delayed(
                    Duration::from_millis(rng.gen_range(1..150)),
                    code_reply(),
                ),
            }
        });
        registry.register(peer_info(index, 100, 4), connection).unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..40 {
        let cancel = CancellationToken::new();
        let cancel_after = {
            let mut rng = rng.lock();
            rng.gen_bool(0.3)
                .then(|| Duration::from_millis(rng.gen_range(1..500)))
        };
        if let Some(after) = cancel_after {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                cancel.cancel();
            });
        }
        tasks.push(spawn_distribute(
            &distributor,
            code_request(),
            ExhaustionPolicy::new(5, None),
            cancel,
        ));
    }

    let watcher = {
        let registry = registry.clone();
        tokio::spawn(async move {
            loop {
                for peer in registry.snapshots() {
                    assert!(peer.outstanding <= peer.budget);
                }
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
        })
    };

    for result in futures::future::join_all(tasks).await {
        let (result, tracker) = result.unwrap();
        match result {
            Ok(_) | Err(OdrError::Canceled) | Err(OdrError::RetrievalExhausted { .. }) => {},
            Err(e) => panic!("unexpected error {e:?}"),
        }
        assert!(tracker.active().is_none());
    }
    watcher.abort();

    for index in 1..=3 {
        assert_eq!(registry.outstanding(&NodeId::from_index(index)), Some(0));
    }
}
