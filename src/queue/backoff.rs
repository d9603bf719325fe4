use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter for retryable dispatch failures.
///
/// There is no retry cap: retries continue for as long as the queue stays
/// active and the failure remains retryable. Suspending the queue is the
/// mechanism to halt retries without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 30_000,
        }
    }
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Delay before the given attempt (1-based), `base * 2^(attempt-1)`
    /// capped at `max_ms`, with +/-50% jitter to spread reconnect storms.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self
            .base_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_ms)
            .max(1);
        let jitter = rand::rng().random_range(0.5..1.5);
        Duration::from_millis(((raw as f64) * jitter) as u64)
    }
}
