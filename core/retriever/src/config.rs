use std::time::Duration;

use lxs_distributor::ExhaustionPolicy;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Attempts a single retrieval may spend, verification failures included.
    pub max_attempts: usize,
    /// Total time a retrieval may take, waiting for eligible peers included.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Exhaustion policy for a job starting now. A timeout too large to be represented
    /// leaves the job without a deadline.
    pub fn policy(&self) -> ExhaustionPolicy {
        ExhaustionPolicy::new(self.max_attempts, Instant::now().checked_add(self.timeout))
    }
}
