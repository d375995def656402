use serde::Serialize;

use crate::config::Settings;
use crate::dataset::{Dataset, DuplicateGroup};
use crate::error::Result;
use crate::report::write_detail_report;
use crate::runlog::RunLog;
use crate::state::data::{EntryScope, ImageRef};
use crate::state::store::{AssetStore, CatalogStore, StoreResult};

/// Correctness of one group member after reassignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Correct,
    WrongImage,
    NoImage,
    NotFound,
}

impl MemberStatus {
    fn issue(&self) -> &'static str {
        match self {
            MemberStatus::Correct => "OK",
            MemberStatus::WrongImage => "WRONG IMAGE",
            MemberStatus::NoImage => "NO IMAGE",
            MemberStatus::NotFound => "NOT FOUND",
        }
    }
}

/// One row of the mismatch report
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Mismatch {
    pub sku: String,
    pub issue: &'static str,
    pub expected_image: String,
    pub actual_image: String,
    pub group: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemberAudit {
    pub correct: usize,
    pub wrong_image: usize,
    pub no_image: usize,
    pub not_found: usize,
    pub failed: usize,
    #[serde(skip)]
    pub mismatches: Vec<Mismatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingMaster {
    pub group: usize,
    pub locator: String,
    pub members: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MasterHealth {
    pub found: usize,
    /// Masters that resolve but whose file is empty or gone from disk
    pub files_missing: usize,
    /// Masters whose file size could not be read from the store
    pub files_unchecked: usize,
    pub missing: Vec<MissingMaster>,
}

/// Known-duplicate locators from the dataset, checked against the asset store
#[derive(Debug, Clone, Default, Serialize)]
pub struct DuplicateCheck {
    pub still_present: usize,
    pub already_removed: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Coverage {
    pub total_visible: u64,
    pub with_image: u64,
    pub without_image: u64,
    /// Distinct member identifiers anywhere in the dataset
    pub dataset_members: usize,
    /// Visible entries whose identifier appears in the dataset
    pub covered: u64,
    pub not_covered: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub groups: usize,
    pub malformed_rows: usize,
    pub members: MemberAudit,
    pub masters: MasterHealth,
    pub duplicates: DuplicateCheck,
    pub coverage: Coverage,
}

/// Read-only verification of catalog and asset store state against the dataset
pub fn run<S>(store: &S, dataset: &Dataset, settings: &Settings, log: &mut RunLog) -> Result<AuditReport>
where
    S: CatalogStore + AssetStore,
{
    let mut report = AuditReport {
        groups: dataset.groups.len(),
        malformed_rows: dataset.malformed_rows,
        ..AuditReport::default()
    };

    log.section("AUDIT 1: ENTRIES NOT MATCHING MASTER IMAGE");
    report.members = audit_members(store, dataset, log);
    log_members(&report.members, settings.mismatch_preview, log);
    log.checkpoint()?;

    log.section("AUDIT 2: DUPLICATE IMAGES STILL IN ASSET STORE");
    report.duplicates = check_duplicates(store, dataset, log);
    log.info(format!("Duplicate images still present: {}", report.duplicates.still_present));
    log.info(format!("Duplicate images already removed: {}", report.duplicates.already_removed));

    log.section("AUDIT 3: MASTER IMAGE HEALTH CHECK");
    report.masters = check_masters(store, dataset, log);
    log.info(format!("Master images found: {} / {}", report.masters.found, dataset.groups.len()));
    log.info(format!("Master images MISSING: {}", report.masters.missing.len()));
    log.info(format!("Master files missing on disk: {}", report.masters.files_missing));
    if report.masters.files_unchecked > 0 {
        log.warn(format!("Master files not checked: {}", report.masters.files_unchecked));
    }
    for missing in &report.masters.missing {
        log.info(format!("  Group {}: {} members affected", missing.group, missing.members));
        log.info(format!("    URL: {}", missing.locator));
    }
    log.checkpoint()?;

    log.section("AUDIT 4: CATALOG COVERAGE");
    report.coverage = coverage(store, dataset, settings.page_size)?;
    let c = &report.coverage;
    log.info(format!("Total published entries: {}", c.total_visible));
    log.info(format!("Entries with images: {}", c.with_image));
    log.info(format!("Entries WITHOUT images: {}", c.without_image));
    log.info(format!("Distinct members in dataset: {}", c.dataset_members));
    log.info(format!("Entries covered by dataset: {}", c.covered));
    log.info(format!("Entries NOT in dataset: {}", c.not_covered));

    let path = log.artifact_path("mismatches", "csv");
    if let Some(path) = write_detail_report(&path, &report.members.mismatches)? {
        log.info(format!("Mismatch report: {}", path.display()));
    }

    log.section("AUDIT COMPLETE");
    log.checkpoint()?;
    Ok(report)
}

/// Compare an entry's current primary image with its group's master
pub fn classify_member(current: Option<&ImageRef>, master: Option<&ImageRef>) -> MemberStatus {
    match current {
        None => MemberStatus::NoImage,
        Some(current) if Some(current) == master => MemberStatus::Correct,
        Some(_) => MemberStatus::WrongImage,
    }
}

fn member_status<C: CatalogStore>(store: &C, sku: &str, group: &DuplicateGroup) -> StoreResult<(MemberStatus, Option<ImageRef>)> {
    let Some(entry) = store.find_entry_by_sku(sku)? else {
        return Ok((MemberStatus::NotFound, None));
    };
    let current = store.primary_image(entry)?;
    Ok((classify_member(current.as_ref(), group.master.as_ref()), current))
}

fn audit_members<C: CatalogStore>(store: &C, dataset: &Dataset, log: &mut RunLog) -> MemberAudit {
    let mut audit = MemberAudit::default();

    for group in &dataset.groups {
        for sku in &group.members {
            let (status, current) = match member_status(store, sku, group) {
                Ok(result) => result,
                Err(err) => {
                    log.warn(format!("Member {sku} (group {}): lookup failed: {err}", group.index));
                    audit.failed += 1;
                    continue;
                }
            };

            match status {
                MemberStatus::Correct => audit.correct += 1,
                MemberStatus::NotFound => audit.not_found += 1,
                MemberStatus::WrongImage | MemberStatus::NoImage => {
                    if status == MemberStatus::NoImage {
                        audit.no_image += 1;
                    } else {
                        audit.wrong_image += 1;
                    }
                    audit.mismatches.push(Mismatch {
                        sku: sku.clone(),
                        issue: status.issue(),
                        expected_image: group.master_filename().to_string(),
                        actual_image: current.as_ref().map_or("(none)", |c| c.filename()).to_string(),
                        group: group.index,
                    });
                }
            }
        }
    }
    audit
}

fn log_members(audit: &MemberAudit, preview: usize, log: &mut RunLog) {
    log.info(format!("Correct (has master image): {}", audit.correct));
    log.info(format!("Wrong image (has different image): {}", audit.wrong_image));
    log.info(format!("No image at all: {}", audit.no_image));
    log.info(format!("Member not found in catalog: {}", audit.not_found));
    if audit.failed > 0 {
        log.warn(format!("Lookups failed: {}", audit.failed));
    }

    if !audit.mismatches.is_empty() && preview > 0 {
        log.info(format!("--- First {preview} mismatches ---"));
        for m in audit.mismatches.iter().take(preview) {
            log.info(format!("  [{}] Member: {} (Group {})", m.issue, m.sku, m.group));
            log.info(format!("    Expected: {}", m.expected_image));
            log.info(format!("    Actual:   {}", m.actual_image));
        }
    }
}

fn check_duplicates<A: AssetStore>(store: &A, dataset: &Dataset, log: &mut RunLog) -> DuplicateCheck {
    let mut check = DuplicateCheck::default();
    for group in &dataset.groups {
        for duplicate in &group.known_duplicates {
            match store.resolve_locator(&duplicate.locator) {
                Ok(Some(_)) => check.still_present += 1,
                Ok(None) => check.already_removed += 1,
                Err(err) => log.warn(format!("Duplicate {}: lookup failed: {err}", duplicate.filename())),
            }
        }
    }
    check
}

fn check_masters<A: AssetStore>(store: &A, dataset: &Dataset, log: &mut RunLog) -> MasterHealth {
    let mut health = MasterHealth::default();
    for group in &dataset.groups {
        let resolved = match &group.master {
            Some(master) => match store.resolve_locator(&master.locator) {
                Ok(found) => found,
                Err(err) => {
                    log.warn(format!("Group {}: master lookup failed: {err}", group.index));
                    None
                }
            },
            None => None,
        };

        if let Some(asset) = resolved {
            health.found += 1;
            match store.asset_size(asset) {
                Ok(0) => {
                    log.warn(format!(
                        "Group {}: master {} has no file on disk",
                        group.index,
                        group.master_filename()
                    ));
                    health.files_missing += 1;
                }
                Ok(_) => {}
                Err(err) => {
                    log.warn(format!("Group {}: master size check failed: {err}", group.index));
                    health.files_unchecked += 1;
                }
            }
        } else {
            health.missing.push(MissingMaster {
                group: group.index,
                locator: group.master.as_ref().map_or_else(String::new, |m| m.locator.clone()),
                members: group.members.len(),
            });
        }
    }
    health
}

fn coverage<C: CatalogStore>(store: &C, dataset: &Dataset, page_size: usize) -> Result<Coverage> {
    let members = dataset.distinct_members();
    let total_visible = store.count_entries(EntryScope::Visible, false)?;
    let with_image = store.count_entries(EntryScope::Visible, true)?;

    let page_size = page_size.max(1);
    let mut covered = 0u64;
    let mut offset = 0;
    loop {
        let page = store.list_entries(EntryScope::Visible, offset, page_size)?;
        covered += page
            .iter()
            .filter(|e| e.sku.as_deref().is_some_and(|sku| members.contains(sku)))
            .count() as u64;
        if page.len() < page_size {
            break;
        }
        offset += page.len();
    }

    Ok(Coverage {
        total_visible,
        with_image,
        without_image: total_visible.saturating_sub(with_image),
        dataset_members: members.len(),
        covered,
        not_covered: total_visible.saturating_sub(covered),
    })
}
