/// Asset store indexing
///
/// Walks an uploads directory and registers every image as an asset, attaching
/// resized copies (`<stem>-<W>x<H>.<ext>`) to the original they were made from.
use rusqlite::ErrorCode;
use std::path::Path;
use walkdir::WalkDir;

use crate::state::library::Library;
use crate::state::store::StoreResult;

/// Result of a folder import operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportResult {
    pub imported_count: usize,
    pub skipped_count: usize,
    pub variant_count: usize,
    pub error_count: usize,
}

/// Image file extensions the asset store tracks
const IMAGE_EXTENSIONS: [(&str, &str); 5] = [
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
];

fn mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
}

/// If `filename` is a resized copy, the filename of its original
pub fn variant_original(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    let (base, size) = stem.rsplit_once('-')?;
    let (width, height) = size.split_once('x')?;

    let is_dim = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if base.is_empty() || !is_dim(width) || !is_dim(height) {
        return None;
    }
    Some(format!("{base}.{ext}"))
}

/// Import all images under `root`; locators are `base_url` joined with the relative path
pub fn import_folder(library: &Library, root: &Path, base_url: &str) -> StoreResult<ImportResult> {
    let mut result = ImportResult::default();
    let mut variants = Vec::new();
    let base_url = base_url.trim_end_matches('/');

    tracing::info!(root = %root.display(), "scanning uploads folder");

    // Walk the directory tree recursively
    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        // Only process files (not directories)
        if !path.is_file() {
            continue;
        }
        let Some(mime) = mime_type(path) else {
            continue;
        };

        let filename = entry.file_name().to_string_lossy().to_string();
        let path_str = path.to_string_lossy().to_string();

        // Variants are attached once every original is registered
        if let Some(original) = variant_original(&filename) {
            if path.with_file_name(&original).is_file() {
                variants.push((path.with_file_name(original), path_str));
                continue;
            }
        }

        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let url = format!("{base_url}/{relative}");

        match library.insert_asset(&url, &path_str, mime) {
            Ok(_) => {
                result.imported_count += 1;
                if result.imported_count % 100 == 0 {
                    tracing::info!("imported {} files...", result.imported_count);
                }
            }
            // UNIQUE constraint violation: already registered
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
                result.skipped_count += 1;
            }
            Err(e) => {
                tracing::warn!("error importing {}: {:?}", filename, e);
                result.error_count += 1;
            }
        }
    }

    for (original, variant) in variants {
        let Some(asset) = library.asset_by_path(&original.to_string_lossy())? else {
            continue;
        };
        match library.insert_variant(asset, &variant) {
            Ok(()) => result.variant_count += 1,
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {}
            Err(e) => {
                tracing::warn!("error attaching variant {}: {:?}", variant, e);
                result.error_count += 1;
            }
        }
    }

    tracing::info!(
        imported = result.imported_count,
        skipped = result.skipped_count,
        variants = result.variant_count,
        "import complete"
    );
    Ok(result)
}
