use clap::ValueEnum;

use super::Counters;
use crate::config::Settings;
use crate::dataset::{Dataset, DuplicateGroup};
use crate::error::Result;
use crate::runlog::RunLog;
use crate::state::data::{filename_of, ImageRef};
use crate::state::store::{AssetStore, CatalogStore, StoreResult};

/// Members listed per group in dry-run output
const DRY_RUN_MEMBER_PREVIEW: usize = 5;

/// Reassignment stage, chosen once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Stage {
    /// Resolve a small sample of members and masters; no changes
    Validate,
    /// Report what every group would change; no changes
    DryRun,
    /// Apply the first few groups
    SmallBatch,
    /// Apply a larger leading slice of groups
    MediumBatch,
    /// Apply every group
    Full,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::DryRun => "dry-run",
            Stage::SmallBatch => "small-batch",
            Stage::MediumBatch => "medium-batch",
            Stage::Full => "full",
        }
    }
}

/// How a stage walks the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Check the first `sample` groups
    Validate { sample: usize },
    /// Run the per-group routine over the first `limit` groups (all when None).
    /// Without `commit` nothing is written.
    Apply { limit: Option<usize>, commit: bool },
}

impl Plan {
    pub fn for_stage(stage: Stage, settings: &Settings) -> Self {
        match stage {
            Stage::Validate => Plan::Validate {
                sample: settings.validate_sample,
            },
            Stage::DryRun => Plan::Apply {
                limit: None,
                commit: false,
            },
            Stage::SmallBatch => Plan::Apply {
                limit: Some(settings.small_batch),
                commit: true,
            },
            Stage::MediumBatch => Plan::Apply {
                limit: Some(settings.medium_batch),
                commit: true,
            },
            Stage::Full => Plan::Apply {
                limit: None,
                commit: true,
            },
        }
    }
}

/// What happened to one member
#[derive(Debug, Clone, PartialEq)]
enum MemberOutcome {
    NotFound,
    AlreadyCorrect,
    /// Carries the previous image locator, if the entry had one
    Updated(Option<String>),
}

/// Run one reassignment stage over `dataset`
pub fn run<S>(store: &mut S, dataset: &Dataset, plan: Plan, log: &mut RunLog) -> Result<Counters>
where
    S: CatalogStore + AssetStore,
{
    let mut counters = Counters {
        malformed_rows: dataset.malformed_rows,
        ..Counters::default()
    };

    match plan {
        Plan::Validate { sample } => validate(store, dataset, sample, log, &mut counters),
        Plan::Apply { limit, commit } => {
            let limit = limit.unwrap_or(dataset.groups.len()).min(dataset.groups.len());
            if commit {
                log.info(format!("Processing {limit} groups - REAL CHANGES"));
            } else {
                log.info(format!("DRY RUN over {limit} groups - no changes"));
            }
            log.checkpoint()?;

            for group in &dataset.groups[..limit] {
                apply_group(store, group, limit, commit, log, &mut counters);
                if commit {
                    // Each group is durable once applied; keep the log in step with it
                    log.checkpoint()?;
                }
            }
            log.info(if commit { "PROCESSING COMPLETE" } else { "DRY RUN COMPLETE" });
        }
    }

    log.checkpoint()?;
    Ok(counters)
}

fn validate<S>(store: &S, dataset: &Dataset, sample: usize, log: &mut RunLog, counters: &mut Counters)
where
    S: CatalogStore + AssetStore,
{
    for group in dataset.groups.iter().take(sample) {
        let Some(member) = group.members.first() else {
            log.warn(format!("Group {}: no members", group.index));
            continue;
        };

        log.info(format!("Checking: {member}"));
        match store.find_entry_by_sku(member) {
            Ok(Some(entry)) => log.info(format!("  ✓ Found entry {entry}")),
            Ok(None) => {
                log.warn("  ✗ Not found");
                counters.not_found += 1;
            }
            Err(err) => {
                log.warn(format!("  ✗ Lookup failed: {err}"));
                counters.failed += 1;
            }
        }

        match resolve_master(store, group) {
            Ok(Some(master)) => log.info(format!(
                "  ✓ Master image found (ID: {})",
                master.id.unwrap_or_default()
            )),
            Ok(None) => {
                log.warn(format!(
                    "  ✗ Master image NOT found in asset store: {}",
                    group.master_filename()
                ));
                counters.missing_master += 1;
            }
            Err(err) => {
                log.warn(format!("  ✗ Master lookup failed: {err}"));
                counters.failed += 1;
            }
        }
        counters.groups_processed += 1;
    }

    log.section("Quick Stats");
    log.info(format!("Total groups: {}", dataset.groups.len()));
    log.info(format!("Total unique members: {}", dataset.member_count()));
    log.info("VALIDATION COMPLETE");
}

/// Resolve a group's master once; None if the group has no master or it is not in the store
fn resolve_master<A: AssetStore>(store: &A, group: &DuplicateGroup) -> StoreResult<Option<ImageRef>> {
    let Some(master) = &group.master else {
        return Ok(None);
    };
    Ok(store
        .resolve_locator(&master.locator)?
        .map(|id| ImageRef::resolved(&master.locator, id)))
}

fn apply_group<S>(
    store: &mut S,
    group: &DuplicateGroup,
    limit: usize,
    commit: bool,
    log: &mut RunLog,
    counters: &mut Counters,
) where
    S: CatalogStore + AssetStore,
{
    log.section(&format!("Group {}/{limit}", group.index));
    log.info(format!("Master: {}", group.master_filename()));
    if !commit {
        let preview = group
            .members
            .iter()
            .take(DRY_RUN_MEMBER_PREVIEW)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let more = if group.members.len() > DRY_RUN_MEMBER_PREVIEW { "..." } else { "" };
        log.info(format!("Members ({}): {preview}{more}", group.members.len()));
    }
    counters.groups_processed += 1;

    let master = match resolve_master(store, group) {
        Ok(Some(master)) => master,
        Ok(None) => {
            if group.is_eligible() {
                log.warn("  ✗ Master image not found in asset store - SKIPPING GROUP");
            } else {
                log.warn("  ✗ No master image in dataset - SKIPPING GROUP");
            }
            counters.missing_master += 1;
            return;
        }
        Err(err) => {
            log.warn(format!("  ✗ Master lookup failed ({err}) - SKIPPING GROUP"));
            counters.failed += 1;
            return;
        }
    };

    for member in &group.members {
        log.info(format!("Member: {member}"));
        match apply_member(store, member, &master, commit) {
            Ok(MemberOutcome::NotFound) => {
                log.warn("  ✗ Entry not found");
                counters.not_found += 1;
            }
            Ok(MemberOutcome::AlreadyCorrect) => {
                log.info("  ✓ Already correct");
                counters.skipped += 1;
            }
            Ok(MemberOutcome::Updated(previous)) => {
                let was = previous.as_deref().map_or("no image", filename_of);
                if commit {
                    log.info(format!("  ✓ UPDATED (was: {was})"));
                } else {
                    log.info(format!("  → would update (was: {was})"));
                }
                counters.updated += 1;
            }
            Err(err) => {
                log.warn(format!("  ✗ Failed: {err}"));
                counters.failed += 1;
            }
        }
    }
}

fn apply_member<S>(store: &mut S, member: &str, master: &ImageRef, commit: bool) -> StoreResult<MemberOutcome>
where
    S: CatalogStore + AssetStore,
{
    let Some(entry) = store.find_entry_by_sku(member)? else {
        return Ok(MemberOutcome::NotFound);
    };

    let current = store.primary_image(entry)?;
    if current.as_ref() == Some(master) {
        return Ok(MemberOutcome::AlreadyCorrect);
    }

    if commit {
        if let Some(id) = master.id {
            store.set_primary_image(entry, id)?;
        }
    }
    Ok(MemberOutcome::Updated(current.map(|c| c.locator)))
}

/// Final summary block for a reassignment run
pub fn log_summary(stage: Stage, counters: &Counters, log: &mut RunLog) {
    log.section("SUMMARY");
    log.info(format!("Stage: {}", stage.as_str()));
    log.info(format!("Groups processed: {}", counters.groups_processed));
    if stage == Stage::DryRun {
        log.info(format!("Entries that would be updated: {}", counters.updated));
    } else {
        log.info(format!("Entries updated: {}", counters.updated));
    }
    log.info(format!("Already correct (skipped): {}", counters.skipped));
    log.info(format!("Entries not found: {}", counters.not_found));
    log.info(format!("Master images missing: {}", counters.missing_master));
    log.info(format!("Failures: {}", counters.failed));
    log.info(format!("Malformed dataset rows: {}", counters.malformed_rows));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::dataset_settings;
    use crate::state::data::{
        AssetId, AssetRecord, CatalogEntry, DeleteOutcome, EntryId, EntryKind, EntryScope, EntryStatus,
    };
    use crate::state::library::Library;
    use crate::state::store::StoreError;

    const MASTER: &str = "https://shop.example/img/m.jpg";

    /// Library whose lookups fail for one member and one master locator
    struct FailingStore {
        inner: Library,
        failing_sku: &'static str,
        failing_locator: &'static str,
    }

    fn offline(key: &str) -> StoreError {
        StoreError::File {
            path: key.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "storage offline"),
        }
    }

    impl CatalogStore for FailingStore {
        fn find_entry_by_sku(&self, sku: &str) -> StoreResult<Option<EntryId>> {
            if sku == self.failing_sku {
                return Err(offline(sku));
            }
            self.inner.find_entry_by_sku(sku)
        }

        fn primary_image(&self, entry: EntryId) -> StoreResult<Option<ImageRef>> {
            self.inner.primary_image(entry)
        }

        fn set_primary_image(&mut self, entry: EntryId, asset: AssetId) -> StoreResult<()> {
            self.inner.set_primary_image(entry, asset)
        }

        fn list_entries(&self, scope: EntryScope, offset: usize, limit: usize) -> StoreResult<Vec<CatalogEntry>> {
            self.inner.list_entries(scope, offset, limit)
        }

        fn count_entries(&self, scope: EntryScope, with_image: bool) -> StoreResult<u64> {
            self.inner.count_entries(scope, with_image)
        }
    }

    impl AssetStore for FailingStore {
        fn resolve_locator(&self, locator: &str) -> StoreResult<Option<AssetId>> {
            if locator == self.failing_locator {
                return Err(offline(locator));
            }
            self.inner.resolve_locator(locator)
        }

        fn asset_size(&self, asset: AssetId) -> StoreResult<u64> {
            self.inner.asset_size(asset)
        }

        fn list_image_assets(&self, offset: usize, limit: usize) -> StoreResult<Vec<AssetRecord>> {
            self.inner.list_image_assets(offset, limit)
        }

        fn delete_asset(&mut self, asset: AssetId) -> StoreResult<DeleteOutcome> {
            self.inner.delete_asset(asset)
        }
    }

    fn scenario_a() -> (tempfile::TempDir, Settings, Library) {
        let dir = tempfile::tempdir().unwrap();
        let settings = dataset_settings(
            dir.path(),
            &format!("skus,master_image_to_keep\n\"A100,A100,B200\",{MASTER}\n"),
        );

        let lib = Library::open_in_memory().unwrap();
        let old = lib
            .insert_asset("https://shop.example/img/old.jpg", "/srv/img/old.jpg", "image/jpeg")
            .unwrap();
        lib.insert_asset(MASTER, "/srv/img/m.jpg", "image/jpeg").unwrap();
        lib.insert_entry(Some("A100"), EntryKind::Product, EntryStatus::Publish, Some(old.to_string().as_str()), None);
        lib.insert_entry(Some("B200"), EntryKind::Product, EntryStatus::Publish, None, None);
        (dir, settings, lib)
    }

    fn load(settings: &Settings) -> (Dataset, RunLog) {
        let mut log = RunLog::new(&settings.log_dir, "test");
        let dataset = Dataset::load(settings, &mut log).unwrap();
        (dataset, log)
    }

    #[test]
    fn test_full_run_is_idempotent() {
        let (_dir, settings, mut lib) = scenario_a();
        let (dataset, mut log) = load(&settings);
        let plan = Plan::for_stage(Stage::Full, &settings);

        let first = run(&mut lib, &dataset, plan, &mut log).unwrap();
        assert_eq!(first.updated, 2);
        assert_eq!(first.skipped, 0);
        assert_eq!(first.groups_processed, 1);

        let second = run(&mut lib, &dataset, plan, &mut log).unwrap();
        assert_eq!(second.updated, 0);
        assert_eq!(second.skipped, 2);

        let entry = lib.find_entry_by_sku("B200").unwrap().unwrap();
        assert_eq!(lib.primary_image(entry).unwrap().unwrap().locator, MASTER);
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let (_dir, settings, mut lib) = scenario_a();
        let (dataset, mut log) = load(&settings);

        let counters = run(&mut lib, &dataset, Plan::for_stage(Stage::DryRun, &settings), &mut log).unwrap();
        assert_eq!(counters.updated, 2);

        let entry = lib.find_entry_by_sku("B200").unwrap().unwrap();
        assert_eq!(lib.thumbnail_ref(entry), None);
    }

    #[test]
    fn test_missing_master_skips_whole_group() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dataset_settings(
            dir.path(),
            "skus,master_image_to_keep\n\
             \"A100,B200\",https://shop.example/img/gone.jpg\n\
             C300,\n",
        );
        let mut lib = Library::open_in_memory().unwrap();
        let a = lib.insert_entry(Some("A100"), EntryKind::Product, EntryStatus::Publish, Some("9"), None);
        let (dataset, mut log) = load(&settings);

        let counters = run(&mut lib, &dataset, Plan::for_stage(Stage::Full, &settings), &mut log).unwrap();
        assert_eq!(counters.missing_master, 2);
        assert_eq!(counters.updated, 0);
        assert_eq!(counters.not_found, 0);
        assert_eq!(lib.thumbnail_ref(a).as_deref(), Some("9"));
    }

    #[test]
    fn test_unknown_member_does_not_stop_group() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dataset_settings(
            dir.path(),
            &format!("skus,master_image_to_keep\n\"Z999,B200\",{MASTER}\n"),
        );
        let mut lib = Library::open_in_memory().unwrap();
        lib.insert_asset(MASTER, "/srv/img/m.jpg", "image/jpeg").unwrap();
        lib.insert_entry(Some("B200"), EntryKind::Product, EntryStatus::Publish, None, None);
        let (dataset, mut log) = load(&settings);

        let counters = run(&mut lib, &dataset, Plan::for_stage(Stage::Full, &settings), &mut log).unwrap();
        assert_eq!(counters.not_found, 1);
        assert_eq!(counters.updated, 1);
    }

    #[test]
    fn test_small_batch_only_touches_leading_groups() {
        let dir = tempfile::tempdir().unwrap();
        let mut csv = String::from("skus,master_image_to_keep\n");
        let mut lib = Library::open_in_memory().unwrap();
        for i in 0..3 {
            let url = format!("https://shop.example/img/m{i}.jpg");
            csv.push_str(&format!("S{i},{url}\n"));
            lib.insert_asset(&url, &format!("/srv/m{i}.jpg"), "image/jpeg").unwrap();
            lib.insert_entry(Some(format!("S{i}").as_str()), EntryKind::Product, EntryStatus::Publish, None, None);
        }
        let mut settings = dataset_settings(dir.path(), &csv);
        settings.small_batch = 2;
        let (dataset, mut log) = load(&settings);

        let counters = run(&mut lib, &dataset, Plan::for_stage(Stage::SmallBatch, &settings), &mut log).unwrap();
        assert_eq!(counters.groups_processed, 2);
        assert_eq!(counters.updated, 2);

        let untouched = lib.find_entry_by_sku("S2").unwrap().unwrap();
        assert_eq!(lib.thumbnail_ref(untouched), None);
    }

    #[test]
    fn test_validate_reports_without_mutation() {
        let (_dir, settings, mut lib) = scenario_a();
        let (dataset, mut log) = load(&settings);

        let counters = run(&mut lib, &dataset, Plan::for_stage(Stage::Validate, &settings), &mut log).unwrap();
        assert_eq!(counters.groups_processed, 1);
        assert_eq!(counters.not_found, 0);
        assert_eq!(counters.missing_master, 0);
        assert_eq!(counters.updated, 0);
        assert!(log.text().contains("Total unique members: 2\n"));
    }

    #[test]
    fn test_store_failures_are_counted_and_isolated() {
        const FLAKY: &str = "https://shop.example/img/flaky.jpg";
        let dir = tempfile::tempdir().unwrap();
        let settings = dataset_settings(
            dir.path(),
            &format!("skus,master_image_to_keep\n\"A1,BAD,C1\",{MASTER}\nD1,{FLAKY}\n"),
        );
        let lib = Library::open_in_memory().unwrap();
        lib.insert_asset(MASTER, "/srv/img/m.jpg", "image/jpeg").unwrap();
        lib.insert_asset(FLAKY, "/srv/img/flaky.jpg", "image/jpeg").unwrap();
        for sku in ["A1", "BAD", "C1", "D1"] {
            lib.insert_entry(Some(sku), EntryKind::Product, EntryStatus::Publish, None, None);
        }
        let mut store = FailingStore {
            inner: lib,
            failing_sku: "BAD",
            failing_locator: FLAKY,
        };
        let (dataset, mut log) = load(&settings);

        let counters = run(&mut store, &dataset, Plan::for_stage(Stage::Full, &settings), &mut log).unwrap();
        assert_eq!(counters.groups_processed, 2);
        // One failed member lookup, one failed master lookup
        assert_eq!(counters.failed, 2);
        assert_eq!(counters.updated, 2);
        assert_eq!(counters.missing_master, 0);

        let c1 = store.inner.find_entry_by_sku("C1").unwrap().unwrap();
        assert_eq!(store.inner.primary_image(c1).unwrap().unwrap().locator, MASTER);
        let d1 = store.inner.find_entry_by_sku("D1").unwrap().unwrap();
        assert_eq!(store.inner.thumbnail_ref(d1), None);
    }
}
