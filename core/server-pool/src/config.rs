use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Step of the moving averages for a weak interaction. Stronger interactions move
    /// the averages by a multiple of it.
    pub ewma_alpha: f64,
    /// Success rate assumed for a server we have never talked to.
    pub initial_success_rate: f64,
    pub min_score: f64,
    pub max_score: f64,
    /// Response time at which a perfectly reliable server gets half of the score range.
    #[serde(with = "humantime_serde")]
    pub target_latency: Duration,
    /// Upper bound of both the reputation table and the candidate set.
    pub max_known_servers: usize,
    #[serde(with = "humantime_serde")]
    pub dial_backoff_base: Duration,
    #[serde(with = "humantime_serde")]
    pub dial_backoff_max: Duration,
    /// Invalid replies tolerated before a server is put in cooldown.
    pub strike_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub strike_cooldown: Duration,
    /// Number of connected servers the dial loop tries to maintain.
    pub target_peers: usize,
    #[serde(with = "humantime_serde")]
    pub dial_interval: Duration,
    /// Where to keep the known servers across restarts. Nothing is persisted if unset.
    pub persist_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ewma_alpha: 0.1,
            initial_success_rate: 0.5,
            min_score: 0.0,
            max_score: 100.0,
            target_latency: Duration::from_millis(500),
            max_known_servers: 200,
            dial_backoff_base: Duration::from_secs(5),
            dial_backoff_max: Duration::from_secs(3600),
            strike_threshold: 3,
            strike_cooldown: Duration::from_secs(600),
            target_peers: 5,
            dial_interval: Duration::from_secs(3),
            persist_path: None,
        }
    }
}
