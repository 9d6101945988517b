//! Centralized configuration constants for listedit.
//!
//! Runtime-tunable governor settings live in [`crate::governor::GovernorConfig`];
//! this module holds the documented defaults it falls back to and the fixed
//! parameters of the API client and bulk driver.

use std::time::Duration;

/// Defaults for the request governor.
///
/// The upstream API enforces roughly 30 requests/minute while degraded and
/// roughly 90/minute otherwise. These values undershoot the degraded budget.
pub struct GovernorDefaults;

impl GovernorDefaults {
    pub const MAX_REQUESTS_PER_SECOND: f64 = 0.5;
    pub const MAX_CONCURRENT_REQUESTS: usize = 1;
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const MAX_RETRIES: u32 = 3;
    pub const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(2000);
    /// Length of the rolling rate window.
    pub const RATE_WINDOW: Duration = Duration::from_millis(1000);
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const USER_AGENT: &'static str = "listedit/0.1";
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:3000/api/graphql";
    pub const TOKEN_ENV_VAR: &'static str = "LISTEDIT_TOKEN";
}

/// Bulk operation driver configuration.
pub struct BulkConfig;

impl BulkConfig {
    /// Upper bound on entry ids sent in one batched mutation.
    pub const MAX_BATCH_SIZE: usize = 50;
    /// Smallest group that is worth a batched mutation.
    pub const MIN_BATCH_SIZE: usize = 2;
}
