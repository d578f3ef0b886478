//! Bounded retry with exponential backoff.
//!
//! Only transient failures are retried (`PipelineError::is_retryable`):
//! transport errors, read deadlines and 5xx answers. A 4xx, a decode failure
//! or a stalled traversal fails immediately.
//!
//! ```text
//! attempt 1: immediate
//! attempt 2: wait initial_backoff
//! attempt 3: wait initial_backoff * multiplier
//! ...        capped at max_backoff
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Retry policy configuration for exponential backoff.
///
/// `backoff(attempt) = min(initial_backoff * backoff_multiplier^attempt, max_backoff)`
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: usize,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (0-indexed).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff = Duration::from_millis(backoff_ms as u64);
        backoff.min(self.max_backoff)
    }
}

/// Decide what to do after attempt number `attempt` (0-indexed) failed with `err`.
///
/// Permanent errors and exhausted retries hand `err` back; otherwise this
/// sleeps for the backoff and returns `Ok(())` so the caller can try again.
/// The sleep is abandoned with `PipelineError::Cancelled` when `cancel` fires.
pub async fn backoff_or_fail(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    attempt: usize,
    err: PipelineError,
) -> Result<()> {
    if !err.is_retryable() {
        return Err(err);
    }

    if attempt >= policy.max_retries {
        warn!(
            attempt = attempt + 1,
            max_retries = policy.max_retries,
            error = %err,
            "max retries exhausted, giving up"
        );
        return Err(err);
    }

    let backoff = policy.backoff(attempt);
    warn!(
        attempt = attempt + 1,
        max_retries = policy.max_retries,
        backoff_ms = backoff.as_millis() as u64,
        error = %err,
        "retryable error, backing off"
    );

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        _ = sleep(backoff) => Ok(()),
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                backoff_or_fail(policy, cancel, attempt, err).await?;
                attempt += 1;
            }
        }
    }
}
