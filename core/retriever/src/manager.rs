use std::sync::Arc;

use lxs_distributor::{AttemptTracker, RequestDistributor};
use lxs_interfaces::ConfigConsumer;
use lxs_metrics::increment_counter;
use lxs_server_pool::ServerPool;
use lxs_types::OdrError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{Config, JobState, RetrievalJob};

/// Runs retrieval jobs: distribute, verify, and try elsewhere when the reply is bad.
pub struct RetrieveManager {
    config: Config,
    distributor: Arc<RequestDistributor>,
}

impl ConfigConsumer for RetrieveManager {
    const KEY: &'static str = "retriever";

    type Config = Config;
}

impl RetrieveManager {
    pub fn new(config: Config, distributor: Arc<RequestDistributor>) -> Self {
        Self {
            config,
            distributor,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn distributor(&self) -> &Arc<RequestDistributor> {
        &self.distributor
    }

    /// Run `job` to completion. Only verified values are ever returned.
    pub async fn retrieve<V>(
        &self,
        job: RetrievalJob<V>,
        cancel: &CancellationToken,
    ) -> Result<V, OdrError> {
        let (state, _) = watch::channel(JobState::Pending);
        self.run(job, cancel, &state).await
    }

    /// Run `job` in the background.
    pub fn spawn<V>(self: &Arc<Self>, job: RetrievalJob<V>) -> RetrievalHandle<V>
    where
        V: Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (state_tx, state) = watch::channel(JobState::Pending);
        let manager = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { manager.run(job, &token, &state_tx).await });
        RetrievalHandle {
            cancel,
            state,
            task,
        }
    }

    async fn run<V>(
        &self,
        job: RetrievalJob<V>,
        cancel: &CancellationToken,
        state: &watch::Sender<JobState>,
    ) -> Result<V, OdrError> {
        let kind = job.request.request.kind();
        let pool: &ServerPool = self.distributor.pool();
        let mut tracker = AttemptTracker::new(job.policy);

        loop {
            transition(state, JobState::Attempting {
                attempt: tracker.attempts() + 1,
            });

            let delivery = match self
                .distributor
                .distribute(&job.request, &mut tracker, cancel)
                .await
            {
                Ok(delivery) => delivery,
                Err(e) => {
                    let (next, result) = match &e {
                        OdrError::Canceled => (JobState::Canceled, "canceled"),
                        _ => (JobState::Exhausted, "exhausted"),
                    };
                    transition(state, next);
                    increment_counter!(
                        "retriever_jobs",
                        Some("Finished retrieval jobs by result"),
                        "kind" => kind.as_str(),
                        "result" => result
                    );
                    if result == "exhausted" {
                        warn!(kind = %kind, attempts = tracker.attempts(), "retrieval failed: {e}");
                    }
                    return Err(e);
                },
            };

            let peer = delivery.peer_id();
            match (job.verify)(&delivery.reply) {
                Ok(value) => {
                    transition(state, JobState::Verified { peer });
                    pool.record_verified(peer);
                    increment_counter!(
                        "retriever_jobs",
                        Some("Finished retrieval jobs by result"),
                        "kind" => kind.as_str(),
                        "result" => "verified"
                    );
                    debug!(peer = %peer, kind = %kind, attempts = tracker.attempts(), "retrieval verified");
                    return Ok(value);
                },
                Err(reason) => {
                    let e = OdrError::VerificationFailed { peer, reason };
                    warn!(kind = %kind, "{e}");
                    pool.record_invalid(peer);
                    increment_counter!(
                        "retriever_invalid_replies",
                        Some("Replies that failed verification"),
                        "kind" => kind.as_str()
                    );
                },
            }
        }
    }
}

/// Move the job to `next` unless it already finished. Terminal states never change.
fn transition(state: &watch::Sender<JobState>, next: JobState) -> bool {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        *current = next;
        true
    })
}

/// Owner side of a job started with [`RetrieveManager::spawn`]. Dropping it leaves the
/// job running.
pub struct RetrievalHandle<V> {
    cancel: CancellationToken,
    state: watch::Receiver<JobState>,
    task: JoinHandle<Result<V, OdrError>>,
}

impl<V> RetrievalHandle<V> {
    /// Stop the job. Has no effect once the job finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    /// Follow the job's state changes.
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.clone()
    }

    pub async fn result(self) -> Result<V, OdrError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                error!("retrieval task failed: {e:?}");
                Err(OdrError::Internal(format!("retrieval task failed: {e}")))
            },
        }
    }
}
