//! Live request statistics.

use crate::classify::FailureClass;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of governor statistics.
///
/// Counters accumulate over the governor's lifetime (until `reset()`).
/// Every attempt, retries included, increments `total_requests` and then
/// exactly one of `successful_requests` or `failed_requests`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retried_requests: u64,
    pub rate_limit_hits: u64,
    /// Mean latency of successful attempts, in milliseconds.
    pub average_response_time: f64,
    /// Entries waiting for dispatch.
    pub current_queue_size: usize,
}

impl Statistics {
    pub(crate) fn record_attempt(&mut self) {
        self.total_requests += 1;
    }

    pub(crate) fn record_success(&mut self, latency: Duration) {
        self.successful_requests += 1;
        let sample = latency.as_secs_f64() * 1000.0;
        // Incremental mean over successful attempts.
        self.average_response_time +=
            (sample - self.average_response_time) / self.successful_requests as f64;
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed_requests += 1;
    }

    pub(crate) fn record_retry(&mut self, class: FailureClass) {
        self.retried_requests += 1;
        if class == FailureClass::RateLimited {
            self.rate_limit_hits += 1;
        }
    }

    /// Attempts that have finished, successfully or not.
    pub fn settled_attempts(&self) -> u64 {
        self.successful_requests + self.failed_requests
    }

    /// Attempts started but not yet finished.
    pub fn in_flight_attempts(&self) -> u64 {
        self.total_requests.saturating_sub(self.settled_attempts())
    }

    /// Whether every counter and gauge is zero.
    pub fn is_zero(&self) -> bool {
        self == &Statistics::default()
    }
}
