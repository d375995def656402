use std::path::PathBuf;
use thiserror::Error;

use crate::state::store::StoreError;

/// Fatal errors. Anything that only affects one row, member, group, or asset
/// is counted and logged by the pipeline instead.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("dataset not found at {}", .0.display())]
    DatasetUnavailable(PathBuf),

    #[error("dataset has no `{0}` column")]
    MissingColumn(String),

    #[error("dataset is empty (no header row)")]
    EmptyDataset,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
