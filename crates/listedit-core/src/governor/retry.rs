//! Retry loop with deterministic exponential backoff.
//!
//! Each attempt passes the rate gate, invokes the operation and records the
//! outcome. Retryable failures sleep `initial_delay * multiplier^retry` before
//! the next attempt. There is no jitter: timing stays reproducible for a single
//! client, at the cost of synchronized retries if many clients shared a budget.

use super::config::GovernorConfig;
use super::Dispatch;
use crate::classify::{FailureClass, RequestError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Backoff parameters captured when an operation is dispatched.
///
/// Later configuration updates do not change the schedule of an operation
/// that is already running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Exponential base.
    pub multiplier: f64,
}

impl BackoffPolicy {
    pub fn from_config(config: &GovernorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.initial_retry_delay,
            multiplier: config.backoff_multiplier,
        }
    }

    /// Delay before retry number `retry_count + 1` (0-indexed).
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = self.multiplier.powi(retry_count.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Every delay this policy can produce, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|n| self.delay_for(n)).collect()
    }

    /// Attempts made when every attempt fails with a retryable error.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Run `operation` until it succeeds, fails fatally, or exhausts its retries.
///
/// Returns the value or the last error seen.
pub(super) async fn run_with_retry<T, F, Fut>(
    dispatch: &Dispatch,
    operation: &mut F,
) -> Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let policy = dispatch.policy;
    let id = dispatch.id;
    let mut retry_count: u32 = 0;

    loop {
        dispatch.record(|stats| stats.record_attempt());
        dispatch.shared.pass_rate_gate(id).await;

        let started = Instant::now();
        match operation().await {
            Ok(value) => {
                let latency = started.elapsed();
                dispatch.record(|stats| stats.record_success(latency));
                if retry_count > 0 {
                    debug!("Request {} succeeded after {} retries", id, retry_count);
                }
                return Ok(value);
            }
            Err(error) => {
                dispatch.record(|stats| stats.record_failure());
                let class = dispatch.shared.classifier.classify(&error);

                if class == FailureClass::Fatal {
                    debug!("Request {} failed with non-retryable error: {}", id, error);
                    return Err(error);
                }

                if retry_count >= policy.max_retries {
                    warn!(
                        "Request {} exhausted {} retries. Last error: {}",
                        id, policy.max_retries, error
                    );
                    return Err(error);
                }

                dispatch.record(|stats| stats.record_retry(class));
                let delay = policy.delay_for(retry_count);
                warn!(
                    "Request {} attempt {}/{} failed ({}): {}. Retrying in {:?}",
                    id,
                    retry_count + 1,
                    policy.max_attempts(),
                    class,
                    error,
                    delay
                );

                tokio::time::sleep(delay).await;
                retry_count += 1;
            }
        }
    }
}
