/// Retry strategies for chunk-level I/O
///
/// Only transient errors are ever retried, and only a bounded number of times.
/// Exponential backoff with jitter keeps a struggling device from being hammered
/// while a marginal sector settles.
use super::classification::ErrorClass;
use std::time::Duration;

/// Retry strategy trait
pub trait RetryStrategy: Send + Sync {
    /// Determine if retry should be attempted after `attempt` failed attempts
    fn should_retry(&self, attempt: u32, class: ErrorClass) -> bool;

    /// Calculate delay before next retry
    fn next_delay(&self, attempt: u32) -> Duration;

    /// Maximum number of retry attempts
    fn max_attempts(&self) -> u32;
}

/// Exponential backoff retry strategy with jitter
///
/// delay = base * 2^attempt, capped at `max_delay`, ± jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,

    /// Jitter factor (0.0 - 1.0)
    jitter_factor: f64,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            jitter_factor: 0.3, // 30% jitter by default
        }
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Preset for chunk writes: a few fast retries
    pub fn chunk_default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(2), 3)
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponential_ms = self
            .base_delay
            .as_millis()
            .saturating_mul(2_u128.saturating_pow(attempt));
        let capped_ms = exponential_ms.min(self.max_delay.as_millis());

        // delay ± (delay * jitter_factor)
        let jitter_range = capped_ms as f64 * self.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
        let final_ms = (capped_ms as f64 + jitter).max(0.0);

        Duration::from_millis(final_ms as u64)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn should_retry(&self, attempt: u32, class: ErrorClass) -> bool {
        attempt < self.max_attempts && class.allows_retry()
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        self.calculate_delay(attempt)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// No retry strategy (hardware erase commands, disconnects)
#[derive(Debug, Clone, Copy)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn should_retry(&self, _attempt: u32, _class: ErrorClass) -> bool {
        false
    }

    fn next_delay(&self, _attempt: u32) -> Duration {
        Duration::from_secs(0)
    }

    fn max_attempts(&self) -> u32 {
        0
    }
}
