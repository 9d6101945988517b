//! Splitting a bulk edit into batched and one-by-one requests.

use crate::api::{EntryChanges, ListEntry, MediaListStatus};
use crate::config::BulkConfig;
use serde::{Deserialize, Serialize};

/// How a bulk edit changes progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "value")]
pub enum ProgressEdit {
    /// Same absolute value for every entry.
    Set(u32),
    /// Relative to each entry's current progress.
    Increment(u32),
    /// Each entry's episode count.
    Complete,
}

/// An edit the user applies to every selected entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BulkEdit {
    pub status: Option<MediaListStatus>,
    pub score: Option<f64>,
    pub progress: Option<ProgressEdit>,
    pub private: Option<bool>,
    pub notes: Option<String>,
}

impl BulkEdit {
    /// Concrete changes for one entry, with no-op fields removed.
    pub fn resolve(&self, entry: &ListEntry) -> EntryChanges {
        let progress = self.progress.and_then(|edit| {
            let target = match edit {
                ProgressEdit::Set(value) => value,
                ProgressEdit::Increment(step) => entry.progress.saturating_add(step),
                ProgressEdit::Complete => entry.total_episodes?,
            };
            Some(match entry.total_episodes {
                Some(total) => target.min(total),
                None => target,
            })
        });

        EntryChanges {
            status: self.status,
            score: self.score,
            progress,
            private: self.private,
            notes: self.notes.clone(),
        }
        .without_noops(entry)
    }
}

/// One batched mutation: identical changes for several entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdate {
    pub ids: Vec<i64>,
    pub changes: EntryChanges,
}

/// One per-entry mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryUpdate {
    pub entry_id: i64,
    pub changes: EntryChanges,
}

/// Requests needed to carry out a bulk edit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkPlan {
    pub batches: Vec<BatchUpdate>,
    pub individual: Vec<EntryUpdate>,
    /// Entries the edit would not change.
    pub unchanged: Vec<i64>,
}

impl BulkPlan {
    /// Entries that need a remote change.
    pub fn entries_to_update(&self) -> usize {
        self.batches.iter().map(|b| b.ids.len()).sum::<usize>() + self.individual.len()
    }

    /// Requests the plan issues when nothing fails.
    pub fn request_count(&self) -> usize {
        self.batches.len() + self.individual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.individual.is_empty()
    }
}

/// Partition `entries` into batched groups and individual updates.
///
/// Entries whose resolved changes are identical share a batch, split into
/// chunks of at most `max_batch_size`. Groups (or trailing chunks) smaller than
/// [`BulkConfig::MIN_BATCH_SIZE`] are sent one by one.
pub fn plan(entries: &[ListEntry], edit: &BulkEdit, max_batch_size: usize) -> BulkPlan {
    let max_batch_size = max_batch_size.max(1);
    let mut groups: Vec<(EntryChanges, Vec<i64>)> = Vec::new();
    let mut result = BulkPlan::default();

    for entry in entries {
        let changes = edit.resolve(entry);
        if changes.is_empty() {
            result.unchanged.push(entry.id);
            continue;
        }
        match groups.iter_mut().find(|(c, _)| *c == changes) {
            Some((_, ids)) => ids.push(entry.id),
            None => groups.push((changes, vec![entry.id])),
        }
    }

    for (changes, ids) in groups {
        for chunk in ids.chunks(max_batch_size) {
            if chunk.len() >= BulkConfig::MIN_BATCH_SIZE {
                result.batches.push(BatchUpdate {
                    ids: chunk.to_vec(),
                    changes: changes.clone(),
                });
            } else {
                result
                    .individual
                    .extend(chunk.iter().map(|&entry_id| EntryUpdate {
                        entry_id,
                        changes: changes.clone(),
                    }));
            }
        }
    }

    result
}
