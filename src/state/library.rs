use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::data::{
    parse_asset_ref, AssetId, AssetRecord, CatalogEntry, DeleteOutcome, EntryId, EntryKind,
    EntryScope, EntryStatus, ImageRef,
};
use super::store::{AssetStore, CatalogStore, StoreError, StoreResult};

/// The Library manages the SQLite catalog database.
/// It stores catalog entries, the uploaded image assets they reference,
/// and the derived variants (resized copies) of each asset.
pub struct Library {
    conn: Connection,
    db_path: PathBuf,
}

impl Library {
    /// Open (or create) the catalog database at `db_path`.
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::File {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let conn = Connection::open(db_path)?;
        tracing::debug!(path = %db_path.display(), "catalog database opened");

        let library = Library {
            conn,
            db_path: db_path.to_path_buf(),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Get the path where the database is stored by default
    /// - Linux: ~/.local/share/image-consolidator/catalog.db
    /// - macOS: ~/Library/Application Support/image-consolidator/catalog.db
    /// - Windows: %APPDATA%\image-consolidator\catalog.db
    pub fn default_db_path() -> PathBuf {
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        path.push("image-consolidator");
        path.push("catalog.db");
        path
    }

    /// Initialize the database schema.
    /// Creates all necessary tables and indexes if they don't exist.
    fn init_schema(&self) -> StoreResult<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        // Uploaded files. `url` is the public locator the catalog refers to.
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS assets (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                url             TEXT NOT NULL UNIQUE,
                filename        TEXT NOT NULL,
                path            TEXT NOT NULL,
                mime_type       TEXT NOT NULL,
                imported_at     INTEGER NOT NULL
            )",
            [],
        )?;

        // Resized copies generated from an asset
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS asset_variants (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                asset_id        INTEGER NOT NULL,
                path            TEXT NOT NULL UNIQUE,
                FOREIGN KEY(asset_id) REFERENCES assets(id) ON DELETE CASCADE
            )",
            [],
        )?;

        // Products and their variations. Image references are kept as raw text,
        // the same way catalog metadata stores them.
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                sku             TEXT,
                kind            TEXT NOT NULL DEFAULT 'product',
                parent_id       INTEGER,
                status          TEXT NOT NULL DEFAULT 'publish',
                thumbnail_ref   TEXT,
                gallery_refs    TEXT
            )",
            [],
        )?;

        // Create indexes for fast lookups
        self.conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_sku
             ON entries(sku) WHERE sku IS NOT NULL AND sku != ''",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entries_status
             ON entries(kind, status)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_asset_variants_asset_id
             ON asset_variants(asset_id)",
            [],
        )?;

        Ok(())
    }

    /// Get the path to the database file
    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Register an uploaded file as an asset.
    /// Returns the new asset ID.
    pub fn insert_asset(&self, url: &str, path: &str, mime_type: &str) -> rusqlite::Result<AssetId> {
        let filename = super::data::filename_of(path).to_string();

        self.conn.execute(
            "INSERT INTO assets (url, filename, path, mime_type, imported_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![url.trim(), filename, path, mime_type, chrono::Utc::now().timestamp()],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Record a resized copy of an asset
    pub fn insert_variant(&self, asset: AssetId, path: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO asset_variants (asset_id, path) VALUES (?1, ?2)",
            params![asset, path],
        )?;
        Ok(())
    }

    /// Find the asset whose original file lives at `path`
    pub fn asset_by_path(&self, path: &str) -> StoreResult<Option<AssetId>> {
        let id = self
            .conn
            .query_row("SELECT id FROM assets WHERE path = ?1", [path], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    fn variant_paths(&self, asset: AssetId) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path FROM asset_variants WHERE asset_id = ?1 ORDER BY id")?;
        let paths = stmt
            .query_map([asset], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }
}

/// SQL filter for an entry scope
fn scope_clause(scope: EntryScope) -> String {
    match scope {
        EntryScope::Reachable => {
            let states: Vec<String> = EntryStatus::REACHABLE
                .iter()
                .map(|s| format!("'{}'", s.as_str()))
                .collect();
            format!("status IN ({})", states.join(", "))
        }
        EntryScope::Visible => format!(
            "kind = '{}' AND status = '{}'",
            EntryKind::Product.as_str(),
            EntryStatus::Publish.as_str()
        ),
    }
}

fn invalid_text(column: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unexpected value {value:?}").into(),
    )
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    let kind: String = row.get(2)?;
    let status: String = row.get(3)?;

    Ok(CatalogEntry {
        id: row.get(0)?,
        sku: row.get(1)?,
        kind: EntryKind::parse(&kind).ok_or_else(|| invalid_text(2, &kind))?,
        status: EntryStatus::parse(&status).ok_or_else(|| invalid_text(3, &status))?,
        thumbnail_ref: row.get(4)?,
        gallery_refs: row.get(5)?,
    })
}

/// Size of a file, or 0 when it no longer exists
fn file_size(path: &str) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Remove one file, returning the bytes it held. A file that is already gone frees nothing.
fn remove_file(path: &str) -> StoreResult<u64> {
    let size = file_size(path);
    match fs::remove_file(path) {
        Ok(()) => Ok(size),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
        Err(source) => Err(StoreError::File {
            path: path.to_string(),
            source,
        }),
    }
}

impl CatalogStore for Library {
    fn find_entry_by_sku(&self, sku: &str) -> StoreResult<Option<EntryId>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM entries WHERE sku = ?1 LIMIT 1",
                [sku],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn primary_image(&self, entry: EntryId) -> StoreResult<Option<ImageRef>> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT thumbnail_ref FROM entries WHERE id = ?1", [entry], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?
            .flatten();
        let Some(asset) = raw.as_deref().and_then(parse_asset_ref) else {
            return Ok(None);
        };

        let url: Option<String> = self
            .conn
            .query_row("SELECT url FROM assets WHERE id = ?1", [asset], |row| row.get(0))
            .optional()?;
        Ok(url.map(|url| ImageRef::resolved(&url, asset)))
    }

    fn set_primary_image(&mut self, entry: EntryId, asset: AssetId) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE entries SET thumbnail_ref = ?1 WHERE id = ?2",
            params![asset.to_string(), entry],
        )?;
        if changed == 0 {
            return Err(StoreError::EntryMissing(entry));
        }
        Ok(())
    }

    fn list_entries(
        &self,
        scope: EntryScope,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<CatalogEntry>> {
        let sql = format!(
            "SELECT id, sku, kind, status, thumbnail_ref, gallery_refs
             FROM entries WHERE {}
             ORDER BY id LIMIT ?1 OFFSET ?2",
            scope_clause(scope)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![limit as i64, offset as i64], entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn count_entries(&self, scope: EntryScope, with_image: bool) -> StoreResult<u64> {
        if !with_image {
            let sql = format!("SELECT COUNT(*) FROM entries WHERE {}", scope_clause(scope));
            let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
            return Ok(count.max(0) as u64);
        }

        // References are validated in Rust so the count agrees with the scanners
        let sql = format!("SELECT thumbnail_ref FROM entries WHERE {}", scope_clause(scope));
        let mut stmt = self.conn.prepare(&sql)?;
        let mut count = 0;
        for raw in stmt.query_map([], |row| row.get::<_, Option<String>>(0))? {
            if raw?.as_deref().and_then(parse_asset_ref).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl AssetStore for Library {
    fn resolve_locator(&self, locator: &str) -> StoreResult<Option<AssetId>> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Ok(None);
        }
        let id = self
            .conn
            .query_row("SELECT id FROM assets WHERE url = ?1", [locator], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    fn asset_size(&self, asset: AssetId) -> StoreResult<u64> {
        let path: Option<String> = self
            .conn
            .query_row("SELECT path FROM assets WHERE id = ?1", [asset], |row| row.get(0))
            .optional()?;
        match path {
            Some(path) => Ok(file_size(&path)),
            None => Err(StoreError::AssetMissing(asset)),
        }
    }

    fn list_image_assets(&self, offset: usize, limit: usize) -> StoreResult<Vec<AssetRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, filename, path FROM assets
             WHERE mime_type LIKE 'image/%'
             ORDER BY id LIMIT ?1 OFFSET ?2",
        )?;

        let rows = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                Ok((row.get::<_, AssetId>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .map(|(id, filename, path)| AssetRecord {
                id,
                filename,
                size: file_size(&path),
                path,
            })
            .collect())
    }

    fn delete_asset(&mut self, asset: AssetId) -> StoreResult<DeleteOutcome> {
        let path: String = self
            .conn
            .query_row("SELECT path FROM assets WHERE id = ?1", [asset], |row| row.get(0))
            .optional()?
            .ok_or(StoreError::AssetMissing(asset))?;

        let mut outcome = DeleteOutcome::default();

        // Files first: if one cannot be removed the rows stay and the asset is still tracked
        for variant in self.variant_paths(asset)? {
            outcome.bytes_freed += remove_file(&variant)?;
            outcome.variants_removed += 1;
        }
        outcome.bytes_freed += remove_file(&path)?;

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM asset_variants WHERE asset_id = ?1", [asset])?;
        tx.execute("DELETE FROM assets WHERE id = ?1", [asset])?;
        tx.commit()?;

        Ok(outcome)
    }
}

#[cfg(test)]
impl Library {
    /// Open a throwaway database that lives only as long as the value
    pub fn open_in_memory() -> StoreResult<Self> {
        let library = Library {
            conn: Connection::open_in_memory()?,
            db_path: PathBuf::from(":memory:"),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Insert a catalog entry directly (test fixture)
    pub fn insert_entry(
        &self,
        sku: Option<&str>,
        kind: EntryKind,
        status: EntryStatus,
        thumbnail_ref: Option<&str>,
        gallery_refs: Option<&str>,
    ) -> EntryId {
        self.conn
            .execute(
                "INSERT INTO entries (sku, kind, status, thumbnail_ref, gallery_refs)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![sku, kind.as_str(), status.as_str(), thumbnail_ref, gallery_refs],
            )
            .unwrap();
        self.conn.last_insert_rowid()
    }

    /// Raw primary image reference of an entry (test inspection)
    pub fn thumbnail_ref(&self, entry: EntryId) -> Option<String> {
        self.conn
            .query_row(
                "SELECT thumbnail_ref FROM entries WHERE id = ?1",
                [entry],
                |row| row.get(0),
            )
            .unwrap()
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, bytes: usize) -> String {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(&vec![0u8; bytes]).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_primary_image_roundtrip() {
        let mut lib = Library::open_in_memory().unwrap();
        let asset = lib
            .insert_asset("https://shop.example/img/m.jpg", "/srv/img/m.jpg", "image/jpeg")
            .unwrap();
        let entry = lib.insert_entry(Some("A100"), EntryKind::Product, EntryStatus::Publish, None, None);

        assert_eq!(lib.find_entry_by_sku("A100").unwrap(), Some(entry));
        assert_eq!(lib.find_entry_by_sku("nope").unwrap(), None);
        assert!(lib.primary_image(entry).unwrap().is_none());

        lib.set_primary_image(entry, asset).unwrap();
        let image = lib.primary_image(entry).unwrap().unwrap();
        assert_eq!(image.locator, "https://shop.example/img/m.jpg");
        assert_eq!(image.id, Some(asset));
        assert_eq!(lib.resolve_locator(" https://shop.example/img/m.jpg ").unwrap(), Some(asset));
    }

    #[test]
    fn test_loose_numeric_references_are_not_images() {
        let lib = Library::open_in_memory().unwrap();
        let asset = lib
            .insert_asset("https://shop.example/img/a.jpg", "/srv/img/a.jpg", "image/jpeg")
            .unwrap();
        assert_eq!(asset, 1);
        let loose = lib.insert_entry(Some("A1"), EntryKind::Product, EntryStatus::Publish, Some("1.0"), None);
        let trailing = lib.insert_entry(Some("A2"), EntryKind::Product, EntryStatus::Publish, Some("1abc"), None);
        let padded = lib.insert_entry(Some("A3"), EntryKind::Product, EntryStatus::Publish, Some(" 1 "), None);

        assert!(lib.primary_image(loose).unwrap().is_none());
        assert!(lib.primary_image(trailing).unwrap().is_none());
        assert_eq!(lib.primary_image(padded).unwrap().unwrap().id, Some(asset));
        assert_eq!(lib.count_entries(EntryScope::Visible, true).unwrap(), 1);
    }

    #[test]
    fn test_set_primary_image_on_missing_entry() {
        let mut lib = Library::open_in_memory().unwrap();
        let err = lib.set_primary_image(42, 1).unwrap_err();
        assert!(matches!(err, StoreError::EntryMissing(42)));
    }

    #[test]
    fn test_scopes_and_counts() {
        let lib = Library::open_in_memory().unwrap();
        lib.insert_entry(Some("P1"), EntryKind::Product, EntryStatus::Publish, Some("3"), None);
        lib.insert_entry(Some("P2"), EntryKind::Product, EntryStatus::Publish, Some("0"), None);
        lib.insert_entry(Some("P3"), EntryKind::Product, EntryStatus::Draft, Some("4"), None);
        lib.insert_entry(None, EntryKind::Variation, EntryStatus::Private, Some("5"), None);
        lib.insert_entry(Some("P4"), EntryKind::Product, EntryStatus::AutoDraft, Some("6"), None);

        assert_eq!(lib.count_entries(EntryScope::Visible, false).unwrap(), 2);
        assert_eq!(lib.count_entries(EntryScope::Visible, true).unwrap(), 1);
        assert_eq!(lib.count_entries(EntryScope::Reachable, false).unwrap(), 4);

        let page = lib.list_entries(EntryScope::Reachable, 1, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].sku.as_deref(), Some("P2"));
        assert_eq!(page[1].status, EntryStatus::Draft);
    }

    #[test]
    fn test_delete_asset_removes_variants() {
        let dir = tempfile::tempdir().unwrap();
        let original = write_file(dir.path(), "dup.jpg", 1000);
        let variant = write_file(dir.path(), "dup-300x300.jpg", 200);

        let mut lib = Library::open_in_memory().unwrap();
        let asset = lib.insert_asset("https://shop.example/dup.jpg", &original, "image/jpeg").unwrap();
        lib.insert_variant(asset, &variant).unwrap();

        assert_eq!(lib.asset_size(asset).unwrap(), 1000);
        let outcome = lib.delete_asset(asset).unwrap();
        assert_eq!(outcome.bytes_freed, 1200);
        assert_eq!(outcome.variants_removed, 1);
        assert!(!Path::new(&original).exists());
        assert!(!Path::new(&variant).exists());
        assert_eq!(lib.resolve_locator("https://shop.example/dup.jpg").unwrap(), None);
        assert!(matches!(lib.delete_asset(asset), Err(StoreError::AssetMissing(_))));
    }

    #[test]
    fn test_list_image_assets_skips_other_types() {
        let dir = tempfile::tempdir().unwrap();
        let jpg = write_file(dir.path(), "a.jpg", 10);
        let pdf = write_file(dir.path(), "manual.pdf", 10);

        let lib = Library::open_in_memory().unwrap();
        lib.insert_asset("https://shop.example/a.jpg", &jpg, "image/jpeg").unwrap();
        lib.insert_asset("https://shop.example/manual.pdf", &pdf, "application/pdf").unwrap();
        lib.insert_asset("https://shop.example/gone.png", "/nonexistent/gone.png", "image/png").unwrap();

        let assets = lib.list_image_assets(0, 10).unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].filename, "a.jpg");
        assert_eq!(assets[0].size, 10);
        assert_eq!(assets[1].size, 0);
    }
}
