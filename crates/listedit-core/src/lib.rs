//! listedit core - governed bulk editing for a media-tracking GraphQL API.
//!
//! The centre of the crate is the [`RequestGovernor`]: every outbound mutation
//! is queued on it, passes a rolling-window rate gate and a concurrency
//! ceiling, and is retried on rate-limit or transient failures. Around it sit
//! the API client boundary ([`api`]) and the bulk operation driver ([`bulk`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use listedit_core::{bulk, BulkDriver, GovernorConfig, GraphQlClient, RequestGovernor};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> listedit_core::Result<()> {
//!     let client = GraphQlClient::new("http://localhost:3000/api/graphql")?.with_token("...");
//!     let governor = RequestGovernor::new(GovernorConfig::default())?;
//!     let driver = BulkDriver::new(governor, Arc::new(client));
//!
//!     let plan = bulk::plan(&entries, &edit, 50);
//!     let report = driver.run(plan).await;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod bulk;
pub mod classify;
pub mod config;
pub mod error;
pub mod governor;

// Re-export commonly used types
pub use api::{DynEntryMutator, EntryChanges, EntryMutator, GraphQlClient, ListEntry, MediaListStatus};
pub use bulk::{BulkDriver, BulkEdit, BulkPlan, BulkProgress, BulkReport, ProgressEdit};
pub use classify::{DefaultClassifier, ErrorClassifier, FailureClass, RequestError, TransportKind};
pub use error::{ListEditError, Result};
pub use governor::{
    GovernorConfig, GovernorConfigUpdate, GovernorState, PendingResult, RateCapacity,
    RequestGovernor, RequestId, Statistics,
};
