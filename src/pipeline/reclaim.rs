use clap::ValueEnum;
use serde::Serialize;
use std::collections::HashSet;

use super::reachability::{self, ReachabilitySet};
use super::Counters;
use crate::config::Settings;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::report::{format_size, write_detail_report};
use crate::runlog::RunLog;
use crate::state::data::AssetRecord;
use crate::state::store::{AssetStore, CatalogStore};

/// Deletions between log checkpoints
const DELETE_CHECKPOINT_EVERY: usize = 50;

/// Reclamation mode, chosen once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// List candidates and estimate space savings; no changes
    Analyze,
    /// Permanently delete candidates and their variants
    Delete,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Analyze => "analyze",
            Mode::Delete => "delete",
        }
    }
}

/// Where an asset lands in the sweep. The first matching rule wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Referenced by a catalog entry
    InUse,
    /// Filename matches some group's master
    Protected,
    /// Orphaned and named like an original product import
    Candidate,
    /// Orphaned but outside the naming policy; left alone
    OutOfPolicy,
}

/// Protected filenames plus the inclusion patterns for candidates
#[derive(Debug, Clone)]
pub struct Policy {
    protected: HashSet<String>,
    patterns: Vec<String>,
}

impl Policy {
    pub fn new(protected: HashSet<String>, patterns: Vec<String>) -> Self {
        Self { protected, patterns }
    }

    pub fn protected_count(&self) -> usize {
        self.protected.len()
    }

    pub fn classify(&self, asset: &AssetRecord, reachable: &ReachabilitySet) -> Classification {
        if reachable.contains(asset.id) {
            Classification::InUse
        } else if self.protected.contains(&asset.filename) {
            Classification::Protected
        } else if self.patterns.iter().any(|p| asset.filename.contains(p.as_str())) {
            Classification::Candidate
        } else {
            Classification::OutOfPolicy
        }
    }
}

/// One row of the candidate detail report
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CandidateRow {
    pub id: i64,
    pub filename: String,
    pub bytes: u64,
    pub path: String,
    pub outcome: &'static str,
}

impl CandidateRow {
    fn new(asset: &AssetRecord) -> Self {
        Self {
            id: asset.id,
            filename: asset.filename.clone(),
            bytes: asset.size,
            path: asset.path.clone(),
            outcome: "candidate",
        }
    }
}

/// Result of a reclamation run
#[derive(Debug, Clone, Default)]
pub struct Reclamation {
    pub counters: Counters,
    pub candidates: Vec<CandidateRow>,
    /// Candidate bytes scaled by the variant multiplier
    pub estimated_bytes: u64,
}

/// Mark, classify, and (in delete mode) sweep every image asset.
///
/// `patterns` must be non-empty; callers obtain it from
/// `Settings::require_candidate_patterns` before touching any store.
pub fn run<S>(
    store: &mut S,
    dataset: &Dataset,
    settings: &Settings,
    patterns: Vec<String>,
    mode: Mode,
    log: &mut RunLog,
) -> Result<Reclamation>
where
    S: CatalogStore + AssetStore,
{
    let policy = Policy::new(dataset.protected_filenames(), patterns);
    log.info(format!("Master images protected: {}", policy.protected_count()));
    log.info(format!("Candidate patterns: {}", policy.patterns.join(", ")));

    let reachable = reachability::scan(&*store, settings.page_size, log)?;
    log.checkpoint()?;

    let mut reclamation = Reclamation::default();
    reclamation.counters.malformed_rows = dataset.malformed_rows;

    // Every asset is classified before the first deletion
    let mut offset = 0;
    loop {
        let page = store.list_image_assets(offset, settings.page_size)?;
        for asset in &page {
            let counters = &mut reclamation.counters;
            match policy.classify(asset, &reachable) {
                Classification::InUse => counters.in_use += 1,
                Classification::Protected => counters.protected += 1,
                Classification::OutOfPolicy => counters.out_of_policy += 1,
                Classification::Candidate => {
                    counters.candidates += 1;
                    counters.candidate_bytes += asset.size;
                    reclamation.candidates.push(CandidateRow::new(asset));
                }
            }
        }
        if page.len() < settings.page_size {
            break;
        }
        offset += page.len();
    }

    let counters = &reclamation.counters;
    log.section("UNUSED IMAGES");
    log.info(format!(
        "In use: {} | Protected: {} | Out of policy: {} | Candidates: {}",
        counters.in_use, counters.protected, counters.out_of_policy, counters.candidates
    ));
    reclamation.estimated_bytes =
        (counters.candidate_bytes as f64 * settings.variant_size_multiplier).round() as u64;

    match mode {
        Mode::Analyze => {
            for row in &reclamation.candidates {
                log.info(format!("  ID: {} | {} | {}", row.id, row.filename, format_size(row.bytes)));
            }
        }
        Mode::Delete => {
            log.info("DELETING UNUSED IMAGES...");
            log.checkpoint()?;
            delete_candidates(store, &mut reclamation, log)?;
        }
    }

    let report = log.artifact_path(&format!("reclaim_{}", mode.as_str()), "csv");
    if let Some(path) = write_detail_report(&report, &reclamation.candidates)? {
        log.info(format!("Candidate report: {}", path.display()));
    }

    log.checkpoint()?;
    Ok(reclamation)
}

fn delete_candidates<A: AssetStore>(
    store: &mut A,
    reclamation: &mut Reclamation,
    log: &mut RunLog,
) -> Result<()> {
    let counters = &mut reclamation.counters;
    for (i, row) in reclamation.candidates.iter_mut().enumerate() {
        log.info(format!("Deleting: {}", row.filename));
        match store.delete_asset(row.id) {
            Ok(outcome) => {
                log.info(format!(
                    "  ✓ Deleted ({} variants, {})",
                    outcome.variants_removed,
                    format_size(outcome.bytes_freed)
                ));
                counters.deleted += 1;
                counters.freed_bytes += outcome.bytes_freed;
                row.outcome = "deleted";
            }
            Err(err) => {
                log.warn(format!("  ✗ Failed: {err}"));
                counters.failed += 1;
                row.outcome = "failed";
            }
        }

        if (i + 1) % DELETE_CHECKPOINT_EVERY == 0 {
            log.checkpoint()?;
        }
    }
    Ok(())
}

/// Final summary block for a reclamation run
pub fn log_summary(mode: Mode, reclamation: &Reclamation, log: &mut RunLog) {
    let counters = &reclamation.counters;
    log.section("SUMMARY");
    log.info(format!("Mode: {}", mode.as_str()));
    log.info(format!("Images in use: {}", counters.in_use));
    log.info(format!("Protected master images: {}", counters.protected));
    log.info(format!("Out of policy (left untouched): {}", counters.out_of_policy));
    log.info(format!("Deletion candidates: {}", counters.candidates));
    log.info(format!("Candidate size: {}", format_size(counters.candidate_bytes)));

    match mode {
        Mode::Analyze => {
            log.info(format!(
                "Estimated size with variants: {}",
                format_size(reclamation.estimated_bytes)
            ));
            log.info("NO CHANGES MADE");
        }
        Mode::Delete => {
            log.info(format!("Deleted: {} images", counters.deleted));
            log.info(format!("Failed: {} images", counters.failed));
            log.info(format!("Space freed: {}", format_size(counters.freed_bytes)));
            log.info("CLEANUP COMPLETE");
        }
    }
}
