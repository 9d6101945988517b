//! Client side of the media-tracking API boundary.
//!
//! This module provides:
//! - List entry types and the changes a bulk edit can apply
//! - GraphQL mutation documents (batched and per-entry)
//! - A reqwest-based client that normalizes failures into `RequestError`
//! - The `EntryMutator` seam the bulk driver depends on

mod client;
mod model;
mod mutations;

pub use client::{interpret_response, GraphQlClient};
pub use model::{EntryChanges, ListEntry, MediaListStatus};
pub use mutations::{batch_variables, entry_variables, SAVE_ENTRY_MUTATION, UPDATE_ENTRIES_MUTATION};

use crate::classify::RequestError;
use async_trait::async_trait;
use std::sync::Arc;

/// Applies list-entry changes remotely.
///
/// Each call is one logical request: the governor wraps it as an operation
/// and may invoke it several times.
#[async_trait]
pub trait EntryMutator: Send + Sync {
    /// Apply the same changes to every entry in `ids` with one request.
    async fn update_entries(&self, ids: &[i64], changes: &EntryChanges) -> Result<(), RequestError>;

    /// Apply changes to a single entry.
    async fn update_entry(&self, id: i64, changes: &EntryChanges) -> Result<(), RequestError>;
}

/// Shared, type-erased mutator.
pub type DynEntryMutator = Arc<dyn EntryMutator>;
