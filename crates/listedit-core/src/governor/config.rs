//! Governor configuration and partial updates.

use crate::config::GovernorDefaults;
use crate::error::{ListEditError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a fractional requests-per-second ceiling maps onto the rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateCapacity {
    /// Block while the 1s window holds at least `max_requests_per_second`
    /// timestamps. A fractional rate therefore admits `ceil(rate)` requests
    /// per second (0.5 behaves like 1.0).
    #[default]
    Literal,
    /// Never exceed the average rate: `max(1, floor(rate))` requests per
    /// window, with the window stretched to `capacity / rate` seconds when the
    /// rate is below one (0.5 admits one request every 2s). Fractions above
    /// one are floored, so 2.5 admits 2 per second.
    Scaled,
}

impl RateCapacity {
    /// Window capacity and span for the given rate.
    pub fn window(&self, max_requests_per_second: f64) -> (usize, Duration) {
        let base = GovernorDefaults::RATE_WINDOW;
        match self {
            RateCapacity::Literal => {
                let capacity = max_requests_per_second.ceil().max(1.0) as usize;
                (capacity, base)
            }
            RateCapacity::Scaled => {
                let capacity = max_requests_per_second.floor().max(1.0);
                let span_secs = (capacity / max_requests_per_second).max(base.as_secs_f64());
                let span = Duration::try_from_secs_f64(span_secs).unwrap_or(Duration::MAX);
                (capacity as usize, span)
            }
        }
    }
}

/// Tunables for a [`super::RequestGovernor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GovernorConfig {
    /// Rolling-window dispatch ceiling.
    pub max_requests_per_second: f64,
    /// Operations allowed past the rate gate and not yet settled.
    pub max_concurrent_requests: usize,
    /// Growth factor between consecutive retry delays.
    pub backoff_multiplier: f64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(with = "duration_millis")]
    pub initial_retry_delay: Duration,
    pub rate_capacity: RateCapacity,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: GovernorDefaults::MAX_REQUESTS_PER_SECOND,
            max_concurrent_requests: GovernorDefaults::MAX_CONCURRENT_REQUESTS,
            backoff_multiplier: GovernorDefaults::BACKOFF_MULTIPLIER,
            max_retries: GovernorDefaults::MAX_RETRIES,
            initial_retry_delay: GovernorDefaults::INITIAL_RETRY_DELAY,
            rate_capacity: RateCapacity::default(),
        }
    }
}

impl GovernorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_requests_per_second(mut self, rate: f64) -> Self {
        self.max_requests_per_second = rate;
        self
    }

    pub fn with_max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = limit;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_initial_retry_delay(mut self, delay: Duration) -> Self {
        self.initial_retry_delay = delay;
        self
    }

    pub fn with_rate_capacity(mut self, capacity: RateCapacity) -> Self {
        self.rate_capacity = capacity;
        self
    }

    /// Capacity and span of the rolling rate window.
    pub fn rate_window(&self) -> (usize, Duration) {
        self.rate_capacity.window(self.max_requests_per_second)
    }

    /// Check every field against its documented range.
    pub fn validate(&self) -> Result<()> {
        if !(self.max_requests_per_second.is_finite() && self.max_requests_per_second > 0.0) {
            return Err(ListEditError::validation(
                "maxRequestsPerSecond",
                format!("must be positive, got {}", self.max_requests_per_second),
            ));
        }
        if self.max_concurrent_requests < 1 {
            return Err(ListEditError::validation(
                "maxConcurrentRequests",
                "must be at least 1",
            ));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier > 1.0) {
            return Err(ListEditError::validation(
                "backoffMultiplier",
                format!("must be greater than 1, got {}", self.backoff_multiplier),
            ));
        }
        if self.initial_retry_delay.is_zero() {
            return Err(ListEditError::validation(
                "initialRetryDelay",
                "must be greater than 0ms",
            ));
        }
        Ok(())
    }

    /// Merge a partial update, returning the validated result.
    ///
    /// `self` is left untouched; an invalid merge is an error.
    pub fn merged(&self, update: &GovernorConfigUpdate) -> Result<Self> {
        let mut merged = self.clone();
        if let Some(rate) = update.max_requests_per_second {
            merged.max_requests_per_second = rate;
        }
        if let Some(limit) = update.max_concurrent_requests {
            merged.max_concurrent_requests = limit;
        }
        if let Some(multiplier) = update.backoff_multiplier {
            merged.backoff_multiplier = multiplier;
        }
        if let Some(retries) = update.max_retries {
            merged.max_retries = retries;
        }
        if let Some(delay) = update.initial_retry_delay {
            merged.initial_retry_delay = delay;
        }
        if let Some(capacity) = update.rate_capacity {
            merged.rate_capacity = capacity;
        }
        merged.validate()?;
        Ok(merged)
    }
}

/// Partial configuration; `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GovernorConfigUpdate {
    pub max_requests_per_second: Option<f64>,
    pub max_concurrent_requests: Option<usize>,
    pub backoff_multiplier: Option<f64>,
    pub max_retries: Option<u32>,
    #[serde(with = "option_duration_millis")]
    pub initial_retry_delay: Option<Duration>,
    pub rate_capacity: Option<RateCapacity>,
}

impl GovernorConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
