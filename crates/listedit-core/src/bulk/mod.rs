//! Bulk operation driver.
//!
//! Turns a user's selection and edit into governed requests:
//! - entries with identical resolved changes go out as batched mutations
//! - everything else is updated one entry at a time
//! - a batch rejected outright can fall back to per-entry updates

mod driver;
mod plan;

pub use driver::{BatchFailure, BulkDriver, BulkProgress, BulkReport, EntryFailure};
pub use plan::{plan, BatchUpdate, BulkEdit, BulkPlan, EntryUpdate, ProgressEdit};
