use std::collections::HashSet;

use lxs_types::NodeId;
use tokio::time::Instant;

/// When a job stops asking for more attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExhaustionPolicy {
    pub max_attempts: usize,
    pub deadline: Option<Instant>,
}

impl ExhaustionPolicy {
    pub fn unbounded() -> Self {
        Self {
            max_attempts: usize::MAX,
            deadline: None,
        }
    }

    pub fn new(max_attempts: usize, deadline: Option<Instant>) -> Self {
        Self {
            max_attempts,
            deadline,
        }
    }
}

/// Lifecycle of one (request, peer) pairing.
///
/// `Queued -> Sent -> {Answered | TimedOut | PeerLost | Failed | Canceled}`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptState {
    /// A peer was picked and budget reserved.
    Queued,
    Sent,
    Answered,
    TimedOut,
    PeerLost,
    /// The wire primitive reported an error.
    Failed,
    Canceled,
}

impl AttemptState {
    pub fn is_active(&self) -> bool {
        matches!(self, AttemptState::Queued | AttemptState::Sent)
    }

    fn can_become(&self, next: AttemptState) -> bool {
        match self {
            AttemptState::Queued => matches!(next, AttemptState::Sent | AttemptState::Canceled),
            AttemptState::Sent => !next.is_active(),
            _ => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Attempt {
    pub peer: NodeId,
    pub state: AttemptState,
    pub started: Instant,
}

/// Attempt history of one logical fetch. Shared by every distribution round of the
/// same job so peers are not asked twice while others are untried.
#[derive(Debug)]
pub struct AttemptTracker {
    policy: ExhaustionPolicy,
    attempts: Vec<Attempt>,
    tried: HashSet<NodeId>,
}

impl AttemptTracker {
    pub fn new(policy: ExhaustionPolicy) -> Self {
        Self {
            policy,
            attempts: Vec::new(),
            tried: HashSet::new(),
        }
    }

    pub fn policy(&self) -> &ExhaustionPolicy {
        &self.policy
    }

    pub fn attempts(&self) -> usize {
        self.attempts.len()
    }

    pub fn history(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn last(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    /// The attempt currently in flight, if any. There is never more than one.
    pub fn active(&self) -> Option<&Attempt> {
        self.attempts.last().filter(|a| a.state.is_active())
    }

    pub fn was_tried(&self, peer: &NodeId) -> bool {
        self.tried.contains(peer)
    }

    /// Peers asked in the current round.
    pub fn tried(&self) -> &HashSet<NodeId> {
        &self.tried
    }

    pub fn is_exhausted(&self, now: Instant) -> bool {
        self.attempts.len() >= self.policy.max_attempts
            || self.policy.deadline.map_or(false, |deadline| now >= deadline)
    }

    /// Every eligible peer was tried, allow asking them again.
    pub(crate) fn new_round(&mut self) {
        self.tried.clear();
    }

    pub(crate) fn begin(&mut self, peer: NodeId) -> usize {
        debug_assert!(self.active().is_none(), "attempts of one job are sequential");
        self.tried.insert(peer);
        self.attempts.push(Attempt {
            peer,
            state: AttemptState::Queued,
            started: Instant::now(),
        });
        self.attempts.len() - 1
    }

    pub(crate) fn transition(&mut self, index: usize, next: AttemptState) {
        if let Some(attempt) = self.attempts.get_mut(index) {
            debug_assert!(
                attempt.state.can_become(next),
                "invalid attempt transition {:?} -> {next:?}",
                attempt.state
            );
            if attempt.state.can_become(next) {
                attempt.state = next;
            }
        }
    }
}
