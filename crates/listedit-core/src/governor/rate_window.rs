//! Rolling-window record of recent dispatch instants.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Dispatch timestamps inside the current rolling window, oldest first.
#[derive(Debug, Default)]
pub(crate) struct RateWindow {
    timestamps: VecDeque<Instant>,
}

impl RateWindow {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Drop every timestamp at least `span` old.
    pub(crate) fn purge(&mut self, now: Instant, span: Duration) {
        while let Some(oldest) = self.timestamps.front() {
            if now.saturating_duration_since(*oldest) >= span {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Purge, then either record `now` or report how long until a slot frees.
    ///
    /// Check and record happen in one call so no other admission can
    /// interleave between them.
    pub(crate) fn try_admit(
        &mut self,
        now: Instant,
        capacity: usize,
        span: Duration,
    ) -> Result<(), Duration> {
        self.purge(now, span);

        if self.timestamps.len() >= capacity {
            // Non-empty here because capacity >= 1.
            let oldest = self.timestamps.front().copied().unwrap_or(now);
            let wait = span.saturating_sub(now.saturating_duration_since(oldest));
            return Err(wait);
        }

        self.timestamps.push_back(now);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub(crate) fn clear(&mut self) {
        self.timestamps.clear();
    }
}
