/// Run settings
///
/// Settings come from three layers, lowest priority first:
/// built-in defaults, an optional JSON settings file, and command line flags.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ReconcileError, Result};
use crate::state::library::Library;

/// Everything a run needs to know that is not per-row data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Duplicate-group dataset (CSV)
    pub dataset_path: PathBuf,
    /// SQLite catalog database
    pub db_path: PathBuf,
    /// Where run logs and detail reports are written
    pub log_dir: PathBuf,

    /// Column holding the delimiter-joined member identifiers
    pub members_column: String,
    /// Column holding the master image locator
    pub master_column: String,
    /// Optional column holding newline-joined known-duplicate locators
    pub duplicates_column: String,
    /// Separator between member identifiers
    pub member_delimiter: char,

    /// Groups checked by the validate stage
    pub validate_sample: usize,
    /// Groups touched by the small-batch stage
    pub small_batch: usize,
    /// Groups touched by the medium-batch stage
    pub medium_batch: usize,

    /// Filename substrings marking an orphan as an original product import.
    /// Empty means reclamation refuses to run.
    pub candidate_patterns: Vec<String>,
    /// Original size times this approximates the size with all derived variants
    pub variant_size_multiplier: f64,

    /// Mismatches printed in the audit log (the CSV report has all of them)
    pub mismatch_preview: usize,
    /// Rows fetched per store page
    pub page_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = Library::default_db_path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            dataset_path: PathBuf::from("data/visual_duplicates.csv"),
            db_path: Library::default_db_path(),
            log_dir: data_dir.join("logs"),
            members_column: "skus".to_string(),
            master_column: "master_image_to_keep".to_string(),
            duplicates_column: "images_to_delete".to_string(),
            member_delimiter: ',',
            validate_sample: 5,
            small_batch: 10,
            medium_batch: 50,
            candidate_patterns: Vec::new(),
            variant_size_multiplier: 4.0,
            mismatch_preview: 20,
            page_size: 500,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file; missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path` if given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Reject values no run could sensibly use
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(ReconcileError::Config("page_size must be at least 1".into()));
        }
        if !(self.variant_size_multiplier >= 1.0) {
            return Err(ReconcileError::Config(
                "variant_size_multiplier must be at least 1.0".into(),
            ));
        }
        if self.members_column.is_empty() || self.master_column.is_empty() {
            return Err(ReconcileError::Config("column names must not be empty".into()));
        }
        Ok(())
    }

    /// Candidate patterns with blanks removed; fails if none are left.
    pub fn require_candidate_patterns(&self) -> Result<Vec<String>> {
        let patterns: Vec<String> = self
            .candidate_patterns
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        if patterns.is_empty() {
            return Err(ReconcileError::Config(
                "no candidate filename patterns configured; pass --pattern or set candidate_patterns"
                    .into(),
            ));
        }
        Ok(patterns)
    }
}
