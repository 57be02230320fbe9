//! Retry-on-conflict with bounded exponential backoff.

use std::future::Future;
use std::time::Duration;

use error_stack::Report;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::store::StoreError;
use super::store::StoreErrorExt;

/// How often, and how patiently, a conflicting write is retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub steps: u32,
    pub initial_backoff: Duration,
    pub factor: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            steps: 5,
            initial_backoff: Duration::from_millis(10),
            factor: 2.0,
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Retries immediately, for tests.
    pub fn immediate(steps: u32) -> Self {
        Self {
            steps,
            initial_backoff: Duration::ZERO,
            factor: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.initial_backoff.as_secs_f64() * self.factor.max(1.0).powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(scaled)
    }
}

/// Runs `op` until it succeeds, fails with something other than a conflict,
/// or the policy's attempts are used up. The last error is returned on
/// exhaustion. Cancellation during a backoff aborts with
/// [`StoreError::Cancelled`].
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    cancellation_token: &CancellationToken,
    mut op: F,
) -> Result<T, Report<StoreError>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Report<StoreError>>>,
{
    let steps = policy.steps.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Err(e) if e.is_conflict() && attempt < steps => {
                let delay = policy.backoff(attempt - 1);
                debug!(attempt, steps, ?delay, "write conflict, retrying: {e}");
                select! {
                    _ = cancellation_token.cancelled() => {
                        return Err(e.change_context(StoreError::Cancelled));
                    }
                    _ = sleep(delay) => {}
                }
            }
            Err(e) if e.is_conflict() => {
                return Err(e.attach_printable(format!("gave up after {steps} attempts")));
            }
            result => return result,
        }
    }
}
