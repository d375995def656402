/// Shared data structures for the catalog and asset store
///
/// These structs represent the data model that flows between
/// the database layer and the reconciliation pipelines.

/// Database ID of a catalog entry (product or variation)
pub type EntryId = i64;

/// Database ID of an asset (an uploaded image)
pub type AssetId = i64;

/// Kind of catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Top-level product
    Product,
    /// Configurable option of a parent product
    Variation,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Product => "product",
            EntryKind::Variation => "variation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "product" => Some(EntryKind::Product),
            "variation" => Some(EntryKind::Variation),
            _ => None,
        }
    }
}

/// Lifecycle state of a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Publish,
    Future,
    Draft,
    Pending,
    Private,
    Trash,
    AutoDraft,
}

impl EntryStatus {
    /// States the mark phase must scan.
    /// Anything here can be shown again or restored, so its images stay reachable.
    pub const REACHABLE: [EntryStatus; 6] = [
        EntryStatus::Publish,
        EntryStatus::Future,
        EntryStatus::Draft,
        EntryStatus::Pending,
        EntryStatus::Private,
        EntryStatus::Trash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Publish => "publish",
            EntryStatus::Future => "future",
            EntryStatus::Draft => "draft",
            EntryStatus::Pending => "pending",
            EntryStatus::Private => "private",
            EntryStatus::Trash => "trash",
            EntryStatus::AutoDraft => "auto-draft",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "publish" => Some(EntryStatus::Publish),
            "future" => Some(EntryStatus::Future),
            "draft" => Some(EntryStatus::Draft),
            "pending" => Some(EntryStatus::Pending),
            "private" => Some(EntryStatus::Private),
            "trash" => Some(EntryStatus::Trash),
            "auto-draft" => Some(EntryStatus::AutoDraft),
            _ => None,
        }
    }
}

/// Which slice of the catalog a listing or count covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryScope {
    /// Every entry kind in every reachable state (mark phase)
    Reachable,
    /// Published top-level products (coverage statistics)
    Visible,
}

/// One catalog entry as seen by the scanners
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: EntryId,
    /// External lookup key (stock code); may be absent on variations
    pub sku: Option<String>,
    pub kind: EntryKind,
    pub status: EntryStatus,
    /// Raw primary image reference as stored (expected to be a numeric asset ID)
    pub thumbnail_ref: Option<String>,
    /// Raw comma-separated gallery asset IDs as stored
    pub gallery_refs: Option<String>,
}

/// A canonical image locator plus the store-internal ID it resolved to
#[derive(Debug, Clone)]
pub struct ImageRef {
    pub locator: String,
    pub id: Option<AssetId>,
}

impl ImageRef {
    pub fn new(locator: &str) -> Self {
        Self {
            locator: locator.trim().to_string(),
            id: None,
        }
    }

    pub fn resolved(locator: &str, id: AssetId) -> Self {
        Self {
            locator: locator.trim().to_string(),
            id: Some(id),
        }
    }

    /// Final path segment of the locator, without query string or fragment
    pub fn filename(&self) -> &str {
        filename_of(&self.locator)
    }
}

// Two refs are the same image iff their trimmed locators match
impl PartialEq for ImageRef {
    fn eq(&self, other: &Self) -> bool {
        self.locator == other.locator
    }
}

impl Eq for ImageRef {}

/// Final path segment of a URL-like locator or filesystem path
pub fn filename_of(locator: &str) -> &str {
    let trimmed = locator.trim();
    let end = trimmed.find(|c: char| c == '?' || c == '#').unwrap_or(trimmed.len());
    let path = trimmed[..end].trim_end_matches('/');
    path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path)
}

/// Asset ID held in a stored image reference (primary or one gallery piece).
///
/// Only plain decimal digits surrounded by ASCII whitespace count, and the
/// value must be positive. Every reader of stored references goes through
/// here, so "referenced" means the same thing to the store and the scanners.
pub fn parse_asset_ref(raw: &str) -> Option<AssetId> {
    let digits = raw.trim_matches(|c: char| c.is_ascii_whitespace());
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<AssetId>().ok().filter(|id| *id > 0)
}

/// One image-type asset in the asset store
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRecord {
    pub id: AssetId,
    /// Filename only (e.g., "widget-blue.jpg")
    pub filename: String,
    /// Byte size of the original file (0 if the file is gone)
    pub size: u64,
    /// Full path to the original file
    pub path: String,
}

/// What a successful asset deletion removed
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeleteOutcome {
    /// Bytes freed across the original and every derived variant
    pub bytes_freed: u64,
    pub variants_removed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_of_url() {
        assert_eq!(
            filename_of("https://shop.example/wp-content/uploads/2023/04/m.jpg"),
            "m.jpg"
        );
        assert_eq!(filename_of(" https://shop.example/img/m.jpg?ver=2 "), "m.jpg");
        assert_eq!(filename_of("m.jpg"), "m.jpg");
        assert_eq!(filename_of(""), "");
    }

    #[test]
    fn test_image_ref_equality_ignores_whitespace_and_id() {
        let a = ImageRef::new("  https://shop.example/img/m.jpg\n");
        let b = ImageRef::resolved("https://shop.example/img/m.jpg", 7);
        assert_eq!(a, b);
        assert_ne!(a, ImageRef::new("https://shop.example/other/m.jpg"));
        assert_eq!(a.filename(), "m.jpg");
    }

    #[test]
    fn test_parse_asset_ref() {
        assert_eq!(parse_asset_ref(" 42 "), Some(42));
        assert_eq!(parse_asset_ref("7\n"), Some(7));
        assert_eq!(parse_asset_ref("0"), None);
        assert_eq!(parse_asset_ref("-3"), None);
        assert_eq!(parse_asset_ref("+3"), None);
        assert_eq!(parse_asset_ref("1.0"), None);
        assert_eq!(parse_asset_ref("12abc"), None);
        assert_eq!(parse_asset_ref(""), None);
        assert_eq!(parse_asset_ref("99999999999999999999"), None);
    }

    #[test]
    fn test_reachable_states() {
        let reachable = EntryStatus::REACHABLE;
        assert!(reachable.contains(&EntryStatus::Draft));
        assert!(reachable.contains(&EntryStatus::Private));
        assert!(reachable.contains(&EntryStatus::Trash));
        assert!(!reachable.contains(&EntryStatus::AutoDraft));
        for status in EntryStatus::REACHABLE {
            assert_eq!(EntryStatus::parse(status.as_str()), Some(status));
        }
    }
}
