//! Configuration for the notification dispatcher.

use std::time::Duration;

/// Tuning knobs for the background notification worker.
///
/// Delivery is best-effort with bounded retries: transient sink failures are
/// retried up to `max_attempts` with exponential backoff, non-retryable
/// rejections are dropped immediately. None of this ever affects the outcome
/// of the reservation that triggered the notice.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Capacity of the in-memory notice queue. A full queue drops the notice
    /// (logged), it never blocks the committing reservation.
    pub queue_capacity: usize,
    /// Total delivery attempts per notice, including the first.
    pub max_attempts: u32,
    /// Base backoff before the first retry, in milliseconds.
    pub backoff_ms: u64,
    /// Multiplier applied per retry.
    pub backoff_factor: u64,
    /// Upper bound on a single backoff interval, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_attempts: 3,
            backoff_ms: 500,
            backoff_factor: 2,
            max_backoff_ms: 10_000,
        }
    }
}

impl NotifierConfig {
    /// Backoff before retry number `retry` (0 = first retry).
    ///
    /// Calculated as `backoff_ms * (backoff_factor ^ retry)`, capped at
    /// `max_backoff_ms`.
    pub fn backoff_for_retry(&self, retry: u32) -> Duration {
        let exponential = self
            .backoff_ms
            .saturating_mul(self.backoff_factor.saturating_pow(retry));
        Duration::from_millis(exponential.min(self.max_backoff_ms))
    }
}
