//! Bulk-edit plan files.
//!
//! A plan file is JSON holding the selected entries, the edit to apply and
//! optional governor overrides:
//!
//! ```json
//! {
//!   "entries": [{ "id": 1, "mediaId": 10, "progress": 3, "totalEpisodes": 12 }],
//!   "edit": { "status": "COMPLETED", "progress": { "mode": "complete" } },
//!   "governor": { "maxRequestsPerSecond": 1.5 },
//!   "maxBatchSize": 25
//! }
//! ```

use anyhow::{bail, Context, Result};
use listedit_core::config::BulkConfig;
use listedit_core::{BulkEdit, GovernorConfigUpdate, ListEntry};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanFile {
    pub entries: Vec<ListEntry>,
    pub edit: BulkEdit,
    #[serde(default)]
    pub governor: GovernorConfigUpdate,
    #[serde(default = "default_batch_size")]
    pub max_batch_size: usize,
}

fn default_batch_size() -> usize {
    BulkConfig::MAX_BATCH_SIZE
}

impl PlanFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file {}", path.display()))?;
        let plan: PlanFile = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid plan file {}", path.display()))?;

        if plan.max_batch_size == 0 {
            bail!("maxBatchSize must be at least 1");
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = plan.entries.iter().find(|e| !seen.insert(e.id)) {
            bail!("Entry {} appears more than once in the plan", dup.id);
        }
        Ok(plan)
    }
}
