use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of distinct servers every transaction is handed to.
    pub fanout: usize,
    /// Transactions remembered for de-duplication and re-broadcast.
    pub max_tracked: usize,
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
    /// Minimum time between two re-broadcast rounds.
    #[serde(with = "humantime_serde")]
    pub rebroadcast_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fanout: 3,
            max_tracked: 4096,
            send_timeout: Duration::from_secs(5),
            rebroadcast_interval: Duration::from_secs(1),
        }
    }
}
