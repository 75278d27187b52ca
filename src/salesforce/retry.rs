//! Backoff policy for bulk uploads.

use std::time::Duration;

use rand::Rng;

use crate::config::UploadConfig;

/// Statuses that signal a temporary server-side condition.
pub const TRANSIENT_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Exclusive upper bound of the jitter; zero disables it.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for RetryPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }
}

impl RetryPolicy {
    pub fn is_transient(status: u16) -> bool {
        TRANSIENT_STATUSES.contains(&status)
    }

    /// Delay after failed attempt `attempt` (1-based), before jitter is added.
    ///
    /// A Retry-After hint always wins over the exponential schedule.
    pub fn base_delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        if let Some(secs) = retry_after_secs {
            return Duration::from_secs(secs);
        }

        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// [`base_delay_for`](Self::base_delay_for) plus the given jitter.
    pub fn delay_with_jitter(
        &self,
        attempt: u32,
        retry_after_secs: Option<u64>,
        jitter: Duration,
    ) -> Duration {
        self.base_delay_for(attempt, retry_after_secs)
            .saturating_add(jitter)
    }

    /// Delay with fresh uniform jitter in `[0, max_jitter)`.
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        self.delay_with_jitter(attempt, retry_after_secs, self.random_jitter())
    }

    fn random_jitter(&self) -> Duration {
        let bound = self.max_jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..bound))
    }
}

/// Reads a Retry-After header given in whole seconds.
///
/// Anything else (HTTP dates, negatives, fractions, garbage) is treated as
/// no hint at all.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}
