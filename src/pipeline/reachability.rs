use std::collections::HashSet;

use crate::error::Result;
use crate::runlog::RunLog;
use crate::state::data::{parse_asset_ref, AssetId, CatalogEntry, EntryKind, EntryScope};
use crate::state::store::CatalogStore;

/// Every asset ID referenced by some catalog entry at scan time.
/// An ID that is absent is referenced by nothing.
#[derive(Debug, Default, Clone)]
pub struct ReachabilitySet {
    ids: HashSet<AssetId>,
    /// Entries visited
    pub entries_scanned: usize,
    /// Of those, variations of a parent product
    pub variations_scanned: usize,
    /// References dropped for being empty, non-numeric, or not positive
    pub invalid_refs: usize,
}

impl ReachabilitySet {
    pub fn contains(&self, id: AssetId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn add_entry(&mut self, entry: &CatalogEntry) {
        self.entries_scanned += 1;
        if entry.kind == EntryKind::Variation {
            self.variations_scanned += 1;
        }

        if let Some(raw) = entry.thumbnail_ref.as_deref().filter(|r| !r.trim().is_empty()) {
            self.add_ref(entry, raw);
        }
        if let Some(gallery) = entry.gallery_refs.as_deref() {
            for raw in gallery.split(',').filter(|r| !r.trim().is_empty()) {
                self.add_ref(entry, raw);
            }
        }
    }

    fn add_ref(&mut self, entry: &CatalogEntry, raw: &str) {
        match parse_asset_ref(raw) {
            Some(id) => {
                self.ids.insert(id);
            }
            None => {
                tracing::debug!(
                    entry = entry.id,
                    status = entry.status.as_str(),
                    raw,
                    "ignoring invalid image reference"
                );
                self.invalid_refs += 1;
            }
        }
    }
}

/// Mark phase: full scan of every entry that could still show or be restored,
/// merging primary and gallery references into one set.
pub fn scan<C: CatalogStore>(catalog: &C, page_size: usize, log: &mut RunLog) -> Result<ReachabilitySet> {
    log.info("Scanning catalog references...");
    let mut set = ReachabilitySet::default();
    let page_size = page_size.max(1);

    let mut offset = 0;
    loop {
        let page = catalog.list_entries(EntryScope::Reachable, offset, page_size)?;
        for entry in &page {
            set.add_entry(entry);
        }
        if page.len() < page_size {
            break;
        }
        offset += page.len();
    }

    if set.is_empty() {
        log.warn("No catalog entry references any image");
    }
    log.info(format!(
        "Scanned {} entries ({} variations): {} referenced images ({} invalid references ignored)",
        set.entries_scanned,
        set.variations_scanned,
        set.len(),
        set.invalid_refs
    ));
    Ok(set)
}
