//! Retry budgets and backoff schedules.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff: `initial * multiplier^n`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub multiplier: u32,
    pub max: Duration,
    /// Fraction of the delay randomly shaved off, `0.0` for none.
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, multiplier: u32, max: Duration) -> Self {
        Self {
            initial,
            multiplier,
            max,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `n` (zero-based).
    pub fn delay_for(&self, n: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(n);
        let delay = self.initial.saturating_mul(factor).min(self.max);
        if self.jitter <= 0.0 {
            return delay;
        }
        let keep = 1.0 - rand::thread_rng().gen_range(0.0..=self.jitter);
        delay.mul_f64(keep)
    }
}

/// Per-client retry limits.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Retries after a 429; total attempts are this plus one.
    pub max_retry_attempts_on_throttled_requests: u32,
    /// Cap on the summed throttling delays of one operation.
    pub max_retry_wait_on_throttled_requests: Duration,
    /// Used when a 429 carries no `x-ms-retry-after-ms`.
    pub throttle_backoff: BackoffPolicy,

    pub max_gone_retries: u32,
    /// Delay schedule from the second gone retry on; the first is immediate.
    pub gone_backoff: BackoffPolicy,
    /// Gone retries stop once the operation has run this long.
    pub gone_retry_window: Duration,

    pub max_session_retries_in_region: u32,
    pub session_backoff: BackoffPolicy,

    pub max_region_failovers: u32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retry_attempts_on_throttled_requests: 9,
            max_retry_wait_on_throttled_requests: Duration::from_secs(30),
            throttle_backoff: BackoffPolicy::new(Duration::from_millis(5), 2, Duration::from_secs(1)),
            max_gone_retries: 3,
            gone_backoff: BackoffPolicy::new(Duration::from_secs(1), 2, Duration::from_secs(15)),
            gone_retry_window: Duration::from_secs(30),
            max_session_retries_in_region: 4,
            session_backoff: BackoffPolicy::new(Duration::from_millis(5), 2, Duration::from_millis(50)),
            max_region_failovers: 3,
        }
    }
}
