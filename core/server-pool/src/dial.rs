use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::record::later;

/// Dial backoff of one server address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialState {
    /// Consecutive failed dials.
    pub failures: u32,
    #[serde(default, with = "humantime_serde")]
    pub retry_at: Option<SystemTime>,
}

impl DialState {
    /// The backoff doubles with every consecutive failure and is capped at `max`.
    pub fn backoff(failures: u32, base: Duration, max: Duration) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        base.checked_mul(factor).unwrap_or(max).min(max)
    }

    pub fn record(&mut self, success: bool, base: Duration, max: Duration, now: SystemTime) {
        if success {
            *self = Self::default();
            return;
        }
        self.failures = self.failures.saturating_add(1);
        self.retry_at = Some(later(now, Self::backoff(self.failures, base, max)));
    }

    pub fn can_dial(&self, now: SystemTime) -> bool {
        self.retry_at.map_or(true, |at| at <= now)
    }
}
