/// Reconciliation pipelines
///
/// This module holds the three batch phases and the mark step they share:
/// - Master-image reassignment (reassign.rs)
/// - Reachability scan over the catalog, the mark phase (reachability.rs)
/// - Orphan classification and deletion, the sweep phase (reclaim.rs)
/// - Post-run verification (audit.rs)
use serde::Serialize;

pub mod audit;
pub mod reachability;
pub mod reassign;
pub mod reclaim;

/// Per-run tallies. A fresh value is created for every run and written to the
/// run summary at the end; values are never carried between runs.
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct Counters {
    pub groups_processed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub not_found: usize,
    pub missing_master: usize,
    pub failed: usize,
    pub malformed_rows: usize,

    pub in_use: usize,
    pub protected: usize,
    pub candidates: usize,
    pub out_of_policy: usize,
    pub deleted: usize,
    pub candidate_bytes: u64,
    pub freed_bytes: u64,
}
