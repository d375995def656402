use thiserror::Error;

use super::data::{
    AssetId, AssetRecord, CatalogEntry, DeleteOutcome, EntryId, EntryScope, ImageRef,
};

/// Errors raised by the catalog and asset stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("file error on {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog entry {0} does not exist")]
    EntryMissing(EntryId),

    #[error("asset {0} does not exist")]
    AssetMissing(AssetId),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Catalog operations the pipelines depend on
pub trait CatalogStore {
    /// Resolve a member identifier (stock code) to its entry
    fn find_entry_by_sku(&self, sku: &str) -> StoreResult<Option<EntryId>>;

    /// Current primary image of an entry, or None if it has none that resolves
    fn primary_image(&self, entry: EntryId) -> StoreResult<Option<ImageRef>>;

    /// Point the entry's primary image at `asset` and persist it in one step
    fn set_primary_image(&mut self, entry: EntryId, asset: AssetId) -> StoreResult<()>;

    /// One page of entries in `scope`, ordered by ID
    fn list_entries(
        &self,
        scope: EntryScope,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<CatalogEntry>>;

    /// Number of entries in `scope`; with `with_image`, only those with a primary image set
    fn count_entries(&self, scope: EntryScope, with_image: bool) -> StoreResult<u64>;
}

/// Asset operations the pipelines depend on
pub trait AssetStore {
    /// Resolve a locator (URL) to the asset it names
    fn resolve_locator(&self, locator: &str) -> StoreResult<Option<AssetId>>;

    /// Current on-disk size of the asset's original file
    fn asset_size(&self, asset: AssetId) -> StoreResult<u64>;

    /// One page of image-type assets, ordered by ID
    fn list_image_assets(&self, offset: usize, limit: usize) -> StoreResult<Vec<AssetRecord>>;

    /// Remove the asset, its derived variants, and their files
    fn delete_asset(&mut self, asset: AssetId) -> StoreResult<DeleteOutcome>;
}
