//! GraphQL documents for list-entry mutations.

use super::model::EntryChanges;
use serde_json::Value;

/// Applies one set of changes to many entries in a single request.
pub const UPDATE_ENTRIES_MUTATION: &str = "\
mutation ($ids: [Int], $status: MediaListStatus, $score: Float, $progress: Int, $private: Boolean, $notes: String) {
  UpdateMediaListEntries(ids: $ids, status: $status, score: $score, progress: $progress, private: $private, notes: $notes) {
    id
  }
}";

/// Updates a single entry.
pub const SAVE_ENTRY_MUTATION: &str = "\
mutation ($id: Int, $status: MediaListStatus, $score: Float, $progress: Int, $private: Boolean, $notes: String) {
  SaveMediaListEntry(id: $id, status: $status, score: $score, progress: $progress, private: $private, notes: $notes) {
    id
    status
    score
    progress
  }
}";

/// Variables for [`UPDATE_ENTRIES_MUTATION`].
pub fn batch_variables(ids: &[i64], changes: &EntryChanges) -> Value {
    let mut vars = changes.to_variables();
    vars.insert("ids".to_string(), Value::from(ids.to_vec()));
    Value::Object(vars)
}

/// Variables for [`SAVE_ENTRY_MUTATION`].
pub fn entry_variables(id: i64, changes: &EntryChanges) -> Value {
    let mut vars = changes.to_variables();
    vars.insert("id".to_string(), Value::from(id));
    Value::Object(vars)
}
