//! Runs a bulk plan through the request governor and tallies the outcome.

use super::plan::{BatchUpdate, BulkPlan, EntryUpdate};
use crate::api::DynEntryMutator;
use crate::error::{ListEditError, Result};
use crate::governor::{PendingResult, RequestGovernor, Statistics};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Live progress of a running bulk edit, in entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkProgress {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BulkProgress {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn is_done(&self) -> bool {
        self.completed() >= self.total
    }
}

/// A batched mutation that failed as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub count: usize,
    pub error: String,
}

/// A per-entry mutation that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryFailure {
    pub entry_id: i64,
    pub error: String,
}

/// Final tally of a bulk edit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReport {
    pub succeeded: usize,
    pub failed: usize,
    pub unchanged: usize,
    pub cancelled: usize,
    /// Failed batches that were retried entry by entry.
    pub fallbacks: usize,
    pub batch_failures: Vec<BatchFailure>,
    pub entry_failures: Vec<EntryFailure>,
    /// Governor statistics at the end of the run.
    pub statistics: Statistics,
}

impl BulkReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    /// One-line outcome, with throttling figures so a user can tell
    /// "my edits failed" from "the service throttled me".
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} entries updated, {} entries failed",
            self.succeeded, self.failed
        );
        if self.cancelled > 0 {
            summary.push_str(&format!(", {} cancelled", self.cancelled));
        }
        if self.unchanged > 0 {
            summary.push_str(&format!(", {} unchanged", self.unchanged));
        }
        summary.push_str(&format!(
            " ({} requests, {} retries, {} rate-limit hits)",
            self.statistics.total_requests,
            self.statistics.retried_requests,
            self.statistics.rate_limit_hits
        ));
        summary
    }

    /// Human-readable failure lines: one per failed batch, one per entry.
    pub fn failure_lines(&self) -> Vec<String> {
        self.batch_failures
            .iter()
            .map(|f| format!("{} entries failed: {}", f.count, f.error))
            .chain(
                self.entry_failures
                    .iter()
                    .map(|f| format!("entry {} failed: {}", f.entry_id, f.error)),
            )
            .collect()
    }
}

enum Unit {
    Batch(BatchUpdate),
    Entry(EntryUpdate),
}

type Completion = BoxFuture<'static, (Unit, Result<()>)>;

/// Drives a [`BulkPlan`] through a [`RequestGovernor`].
pub struct BulkDriver {
    governor: RequestGovernor,
    mutator: DynEntryMutator,
    fallback_to_individual: bool,
    progress: watch::Sender<BulkProgress>,
}

impl BulkDriver {
    pub fn new(governor: RequestGovernor, mutator: DynEntryMutator) -> Self {
        let (progress, _) = watch::channel(BulkProgress::default());
        Self {
            governor,
            mutator,
            fallback_to_individual: true,
            progress,
        }
    }

    /// Whether a batch that fails with a non-retryable error is re-sent
    /// entry by entry. Enabled by default.
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_to_individual = enabled;
        self
    }

    pub fn governor(&self) -> &RequestGovernor {
        &self.governor
    }

    /// Watch progress of the current run.
    pub fn subscribe(&self) -> watch::Receiver<BulkProgress> {
        self.progress.subscribe()
    }

    /// Execute every request in `plan` and wait for all of them to settle.
    pub async fn run(&self, plan: BulkPlan) -> BulkReport {
        let stop = self.governor.stop_token();
        let mut report = BulkReport {
            unchanged: plan.unchanged.len(),
            ..Default::default()
        };
        let mut progress = BulkProgress {
            total: plan.entries_to_update(),
            ..Default::default()
        };
        self.progress.send_replace(progress.clone());

        info!(
            "Starting bulk edit: {} entries in {} batches and {} single updates",
            progress.total,
            plan.batches.len(),
            plan.individual.len()
        );

        let mut pending: FuturesUnordered<Completion> = FuturesUnordered::new();
        for batch in plan.batches {
            pending.push(self.submit_batch(batch));
        }
        for update in plan.individual {
            pending.push(self.submit_entry(update));
        }

        while let Some((unit, outcome)) = pending.next().await {
            match (unit, outcome) {
                (Unit::Batch(batch), Ok(())) => {
                    debug!("Batch of {} entries updated", batch.ids.len());
                    progress.succeeded += batch.ids.len();
                }
                (Unit::Batch(batch), Err(ListEditError::Cancelled)) => {
                    progress.cancelled += batch.ids.len();
                }
                (Unit::Batch(batch), Err(err)) => {
                    if self.fallback_to_individual && !err.is_retryable() && !stop.is_cancelled() {
                        warn!(
                            "Batch of {} entries failed ({}); retrying one by one",
                            batch.ids.len(),
                            err
                        );
                        report.fallbacks += 1;
                        for entry_id in batch.ids {
                            pending.push(self.submit_entry(EntryUpdate {
                                entry_id,
                                changes: batch.changes.clone(),
                            }));
                        }
                    } else {
                        warn!("Batch of {} entries failed: {}", batch.ids.len(), err);
                        progress.failed += batch.ids.len();
                        report.batch_failures.push(BatchFailure {
                            count: batch.ids.len(),
                            error: err.to_string(),
                        });
                    }
                }
                (Unit::Entry(_), Ok(())) => progress.succeeded += 1,
                (Unit::Entry(_), Err(ListEditError::Cancelled)) => progress.cancelled += 1,
                (Unit::Entry(update), Err(err)) => {
                    warn!("Entry {} failed: {}", update.entry_id, err);
                    progress.failed += 1;
                    report.entry_failures.push(EntryFailure {
                        entry_id: update.entry_id,
                        error: err.to_string(),
                    });
                }
            }
            self.progress.send_replace(progress.clone());
        }

        report.succeeded = progress.succeeded;
        report.failed = progress.failed;
        report.cancelled = progress.cancelled;
        report.statistics = self.governor.statistics();
        info!("Bulk edit finished: {}", report.summary());
        report
    }

    fn submit_batch(&self, batch: BatchUpdate) -> Completion {
        let mutator = Arc::clone(&self.mutator);
        let ids = batch.ids.clone();
        let changes = batch.changes.clone();
        let handle: PendingResult<()> = self.governor.enqueue(move || {
            let mutator = Arc::clone(&mutator);
            let ids = ids.clone();
            let changes = changes.clone();
            async move { mutator.update_entries(&ids, &changes).await }
        });
        debug!("Batch of {} entries queued as {}", batch.ids.len(), handle.id());
        Box::pin(async move { (Unit::Batch(batch), handle.await) })
    }

    fn submit_entry(&self, update: EntryUpdate) -> Completion {
        let mutator = Arc::clone(&self.mutator);
        let entry_id = update.entry_id;
        let changes = update.changes.clone();
        let handle: PendingResult<()> = self.governor.enqueue(move || {
            let mutator = Arc::clone(&mutator);
            let changes = changes.clone();
            async move { mutator.update_entry(entry_id, &changes).await }
        });
        Box::pin(async move { (Unit::Entry(update), handle.await) })
    }
}
