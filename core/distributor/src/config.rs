use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long a single peer gets to answer before the request moves on.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Upper bound between two eligibility checks of a waiting request, in case a peer
    /// becomes usable without the registry changing (e.g. a cooldown ran out).
    #[serde(with = "humantime_serde")]
    pub recheck_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            recheck_interval: Duration::from_secs(1),
        }
    }
}
