use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::Config;

/// Longest a cooldown or dial backoff may last, whatever the configuration says.
pub(crate) const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `now + after`, capped at [`MAX_DELAY`].
pub(crate) fn later(now: SystemTime, after: Duration) -> SystemTime {
    now.checked_add(after.min(MAX_DELAY)).unwrap_or(now)
}

/// How much a single interaction tells us about a server.
#[derive(Clone, Copy, Debug, Hash, PartialEq, PartialOrd, Ord, Eq)]
pub enum Weight {
    Weak,
    Strong,
    VeryStrong,
    /// We hold cryptographic evidence, e.g. a proof that does not verify.
    Provable,
}

impl Weight {
    fn factor(self) -> f64 {
        match self {
            Weight::Weak => 1.0,
            Weight::Strong => 2.0,
            Weight::VeryStrong => 4.0,
            Weight::Provable => 8.0,
        }
    }
}

/// Reputation of a server identity, kept across connections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Moving average of successful interactions, in `[0, 1]`.
    pub success_rate: f64,
    /// Moving average of response times of successful requests.
    #[serde(default, with = "humantime_serde")]
    pub latency: Option<Duration>,
    /// Invalid replies since the last cooldown.
    pub strikes: u32,
    #[serde(default, with = "humantime_serde")]
    pub excluded_until: Option<SystemTime>,
    #[serde(with = "humantime_serde")]
    pub last_seen: SystemTime,
    #[serde(default, with = "humantime_serde")]
    pub last_success: Option<SystemTime>,
}

impl ServerRecord {
    pub fn new(config: &Config, now: SystemTime) -> Self {
        Self {
            success_rate: config.initial_success_rate.clamp(0.0, 1.0),
            latency: None,
            strikes: 0,
            excluded_until: None,
            last_seen: now,
            last_success: None,
        }
    }

    pub fn update(
        &mut self,
        success: bool,
        weight: Weight,
        latency: Option<Duration>,
        config: &Config,
        now: SystemTime,
    ) {
        let alpha = (config.ewma_alpha * weight.factor()).clamp(0.0, 1.0);
        let sample = if success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate + alpha * (sample - self.success_rate)).clamp(0.0, 1.0);

        if let (true, Some(sample)) = (success, latency) {
            self.latency = Some(match self.latency {
                None => sample,
                Some(current) => {
                    let alpha = config.ewma_alpha.clamp(0.0, 1.0);
                    let secs = current.as_secs_f64()
                        + alpha * (sample.as_secs_f64() - current.as_secs_f64());
                    Duration::from_secs_f64(secs.max(0.0))
                },
            });
        }

        self.last_seen = now;
        if success {
            self.last_success = Some(now);
        }
    }

    /// Count an invalid reply. Returns true if this strike put the server in cooldown.
    pub fn strike(&mut self, config: &Config, now: SystemTime) -> bool {
        self.strikes = self.strikes.saturating_add(1);
        if self.strikes < config.strike_threshold.max(1) {
            return false;
        }
        self.strikes = 0;
        self.excluded_until = Some(later(now, config.strike_cooldown));
        true
    }

    pub fn is_excluded(&self, now: SystemTime) -> bool {
        self.excluded_until.map_or(false, |until| until > now)
    }

    /// Single rank combining reliability and speed, always within
    /// `[min_score, max_score]`. A server without latency samples is assumed to answer
    /// at the target latency.
    pub fn score(&self, config: &Config) -> f64 {
        let (min, max) = if config.min_score <= config.max_score {
            (config.min_score, config.max_score)
        } else {
            (config.max_score, config.min_score)
        };
        let target = config.target_latency.as_secs_f64();
        let latency = self.latency.map_or(target, |l| l.as_secs_f64());
        let speed = if target + latency > 0.0 {
            target / (target + latency)
        } else {
            1.0
        };
        let score = min + (max - min) * self.success_rate * speed;
        if score.is_nan() {
            return min;
        }
        score.clamp(min, max)
    }
}
