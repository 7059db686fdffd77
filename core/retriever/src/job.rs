use lxs_distributor::{DistRequest, ExhaustionPolicy};
use lxs_types::{NodeId, OdrReply, VerifyError};

pub type VerifyFn<V> = Box<dyn Fn(&OdrReply) -> Result<V, VerifyError> + Send + Sync>;

/// One logical data need: what to ask, how to check the answer and when to give up.
pub struct RetrievalJob<V> {
    pub request: DistRequest,
    /// Pure check of a reply. An error always blames the peer that sent the reply, data
    /// that provably does not exist has to be expressed as a successful value.
    pub verify: VerifyFn<V>,
    pub policy: ExhaustionPolicy,
}

impl<V> RetrievalJob<V> {
    pub fn new<F>(request: DistRequest, policy: ExhaustionPolicy, verify: F) -> Self
    where
        F: Fn(&OdrReply) -> Result<V, VerifyError> + Send + Sync + 'static,
    {
        Self {
            request,
            verify: Box::new(verify),
            policy,
        }
    }
}

/// `Pending -> Attempting -> {Verified | Exhausted | Canceled}`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Pending,
    /// Waiting for the reply of the `attempt`-th attempt, counting from one.
    Attempting { attempt: usize },
    Verified { peer: NodeId },
    Exhausted,
    Canceled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Verified { .. } | JobState::Exhausted | JobState::Canceled
        )
    }
}
