use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Write one CSV row per item, with a header derived from the row type.
/// Nothing is written for an empty slice.
pub fn write_detail_report<T: Serialize>(path: &Path, rows: &[T]) -> Result<Option<PathBuf>> {
    if rows.is_empty() {
        return Ok(None);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(Some(path.to_path_buf()))
}

/// Human-readable byte size (1024-based, one decimal above bytes)
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
