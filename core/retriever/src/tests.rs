use std::sync::Arc;
use std::time::Duration;

use lxs_distributor::{DistRequest, ExhaustionPolicy, RequestDistributor};
use lxs_peers::PeerRegistry;
use lxs_server_pool::ServerPool;
use lxs_test_utils::mock::MockConnection;
use lxs_test_utils::peer_info;
use lxs_types::{Bytes, NodeId, OdrError, OdrReply, OdrRequest, RequestKind, VerifyError, B256};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use crate::{Config, JobState, RetrievalJob, RetrieveManager};

fn setup() -> Arc<RetrieveManager> {
    lxs_test_utils::logging::try_init();
    let registry = Arc::new(PeerRegistry::new());
    let pool = Arc::new(ServerPool::new(Default::default(), registry.clone()));
    let distributor = Arc::new(RequestDistributor::new(
        Default::default(),
        registry,
        pool,
    ));
    Arc::new(RetrieveManager::new(Config::default(), distributor))
}

fn registry(manager: &RetrieveManager) -> &PeerRegistry {
    manager.distributor().registry()
}

fn code(bytes: &'static [u8]) -> OdrReply {
    OdrReply::Code(Bytes::from_static(bytes))
}

/// A code job that only accepts code starting with `0x60`.
fn code_job(policy: ExhaustionPolicy) -> RetrievalJob<Bytes> {
    let request = DistRequest::new(OdrRequest::Code {
        block_hash: B256::repeat_byte(1),
        addr_hash: B256::repeat_byte(2),
        code_hash: B256::repeat_byte(3),
    });
    RetrievalJob::new(request, policy, |reply| match reply {
        OdrReply::Code(code) if code.first() == Some(&0x60) => Ok(code.clone()),
        OdrReply::Code(_) => Err(VerifyError::InvalidProof("code hash mismatch".into())),
        other => Err(VerifyError::UnexpectedReply {
            expected: RequestKind::Code,
            got: other.kind(),
        }),
    })
}

#[tokio::test(start_paused = true)]
async fn test_first_verified_reply_wins() {
    let manager = setup();
    let liar = MockConnection::replying(code(b"\xff"));
    let first = MockConnection::replying(code(b"\x60\x01"));
    let second = MockConnection::replying(code(b"\x60\x02"));
    registry(&manager).register(peer_info(1, 100, 5), liar.clone()).unwrap();
    registry(&manager).register(peer_info(2, 100, 5), first.clone()).unwrap();
    registry(&manager).register(peer_info(3, 100, 5), second.clone()).unwrap();

    let handle = manager.spawn(code_job(ExhaustionPolicy::new(8, None)));
    let value = handle.result().await.unwrap();

    assert_eq!(value, Bytes::from_static(b"\x60\x01"));
    assert_eq!(liar.requests(), 1);
    assert_eq!(first.requests(), 1);
    assert_eq!(second.requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_bad_proof_then_good_proof() {
    let manager = setup();
    let pool = manager.distributor().pool().clone();
    registry(&manager)
        .register(peer_info(1, 100, 5), MockConnection::replying(code(b"\x00")))
        .unwrap();
    registry(&manager)
        .register(peer_info(2, 100, 5), MockConnection::replying(code(b"\x60")))
        .unwrap();
    let fresh = pool.quality(&NodeId::from_index(1));

    let handle = manager.spawn(code_job(ExhaustionPolicy::new(8, None)));
    let mut states = handle.subscribe();
    let value = handle.result().await.unwrap();

    assert_eq!(value, Bytes::from_static(b"\x60"));
    assert_eq!(
        *states.borrow_and_update(),
        JobState::Verified {
            peer: NodeId::from_index(2)
        }
    );
    assert!(pool.quality(&NodeId::from_index(1)) < fresh);
    assert_eq!(pool.record(&NodeId::from_index(1)).unwrap().strikes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_only_bad_proofs_exhaust_the_job() {
    let manager = setup();
    let liar = MockConnection::replying(code(b"\x00"));
    registry(&manager).register(peer_info(1, 100, 5), liar.clone()).unwrap();

    let handle = manager.spawn(code_job(ExhaustionPolicy::new(2, None)));
    let mut states = handle.subscribe();
    let err = handle.result().await.unwrap_err();

    assert_eq!(err, OdrError::RetrievalExhausted { attempts: 2 });
    assert!(err.is_terminal());
    assert_eq!(*states.borrow_and_update(), JobState::Exhausted);
    assert_eq!(liar.requests(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_bad_proofs_put_peer_in_cooldown() {
    let manager = setup();
    let liar = MockConnection::replying(code(b"\x00"));
    registry(&manager).register(peer_info(1, 100, 5), liar.clone()).unwrap();

    let cancel = CancellationToken::new();
    let job = code_job(ExhaustionPolicy::new(10, None));
    let retrieval = {
        let manager = manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.retrieve(job, &cancel).await })
    };

    // After three strikes the peer is excluded and the job waits for someone else.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(liar.requests(), 3);
    assert!(manager.distributor().pool().is_excluded(&NodeId::from_index(1)));

    cancel.cancel();
    assert_eq!(retrieval.await.unwrap().unwrap_err(), OdrError::Canceled);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_verified_is_a_no_op() {
    let manager = setup();
    let pool = manager.distributor().pool().clone();
    let good = MockConnection::replying(code(b"\x60"));
    registry(&manager).register(peer_info(1, 100, 5), good.clone()).unwrap();

    let handle = manager.spawn(code_job(ExhaustionPolicy::new(8, None)));
    let mut states = handle.subscribe();
    states
        .wait_for(|state| state.is_terminal())
        .await
        .unwrap();
    let record = pool.record(&NodeId::from_index(1)).unwrap();

    handle.cancel();
    handle.cancel();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(
        handle.state(),
        JobState::Verified {
            peer: NodeId::from_index(1)
        }
    );
    assert_eq!(pool.record(&NodeId::from_index(1)).unwrap(), record);
    assert_eq!(handle.result().await.unwrap(), Bytes::from_static(b"\x60"));
    assert_eq!(good.requests(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_pending_job() {
    let manager = setup();
    let handle = manager.spawn(code_job(ExhaustionPolicy::unbounded()));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(handle.state(), JobState::Attempting { attempt: 1 });

    handle.cancel();
    let mut states = handle.subscribe();
    states
        .wait_for(|state| state.is_terminal())
        .await
        .unwrap();
    assert_eq!(handle.state(), JobState::Canceled);
    assert_eq!(handle.result().await.unwrap_err(), OdrError::Canceled);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_policy_exhausts_job() {
    let manager = setup();
    let policy = manager.config().policy();
    let err = manager
        .retrieve(code_job(policy), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, OdrError::RetrievalExhausted { attempts: 0 });
}

#[tokio::test(start_paused = true)]
async fn test_huge_timeout_means_no_deadline() {
    let config = Config {
        max_attempts: 3,
        timeout: Duration::MAX,
    };
    let policy = config.policy();
    assert_eq!(policy.deadline, None);
    assert_eq!(policy.max_attempts, 3);
    assert!(Config::default().policy().deadline.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_crashed_job_is_an_internal_error() {
    let manager = setup();
    registry(&manager)
        .register(peer_info(1, 100, 5), MockConnection::replying(code(b"\x60")))
        .unwrap();
    let request = DistRequest::new(OdrRequest::Code {
        block_hash: B256::repeat_byte(1),
        addr_hash: B256::repeat_byte(2),
        code_hash: B256::repeat_byte(3),
    });
    let job = RetrievalJob::new(
        request,
        ExhaustionPolicy::new(8, None),
        |_| -> Result<Bytes, VerifyError> { panic!("verifier bug") },
    );

    let err = manager.spawn(job).result().await.unwrap_err();
    assert!(matches!(err, OdrError::Internal(_)), "{err:?}");
    assert!(err.is_terminal());
}
