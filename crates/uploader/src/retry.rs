//! Capped exponential backoff with jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::UploadError;

/// Jitter range applied to every backoff delay.
const JITTER: std::ops::RangeInclusive<f64> = 0.85..=1.15;

/// Retry budget of one kind of operation.
///
/// Attempt `i` (0-based) that fails is followed by a sleep of
/// `min(max_delay, base_delay * 2^i)` scaled by a random factor in
/// `[0.85, 1.15]`. The operation runs at most `retries + 1` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl RetryPolicy {
    pub const fn new(retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            retries,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Budget for presigned URL requests: 4 retries from 400 ms.
    pub const fn part_url() -> Self {
        Self::new(4, 400, 10_000)
    }

    /// Budget for part PUTs: 5 retries from 600 ms, capped at 12 s.
    pub const fn part_transfer() -> Self {
        Self::new(5, 600, 12_000)
    }

    /// Delay after failed attempt `attempt` before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Delay after failed attempt `attempt`, with jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(JITTER);
        self.backoff(attempt).mul_f64(jitter)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// the budget is spent. `op` receives the 0-based attempt index.
    ///
    /// Cancelling `cancel` interrupts the backoff sleep with
    /// [`UploadError::Cancelled`].
    pub async fn execute<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, UploadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        let mut attempt = 0;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if attempt >= self.retries || !err.is_retryable() {
                return Err(err);
            }

            let delay = self.delay_for_attempt(attempt);
            warn!(
                op = %label,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
