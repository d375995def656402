use chrono::Local;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Timestamped run log.
///
/// Every record goes to `tracing` immediately and is buffered for the run's
/// log file. Buffered lines reach disk only at `checkpoint()`, which drains
/// them, and the file is created on the first checkpoint, so a run that fails
/// before its first checkpoint leaves nothing behind.
#[derive(Debug)]
pub struct RunLog {
    log_dir: PathBuf,
    name: String,
    stamp: String,
    /// Lines recorded since the last checkpoint
    pending: Vec<String>,
    file: Option<PathBuf>,
}

impl RunLog {
    /// `name` identifies the pipeline and mode, e.g. `consolidator_stage_full`
    pub fn new(log_dir: &Path, name: &str) -> Self {
        Self {
            log_dir: log_dir.to_path_buf(),
            name: name.to_string(),
            stamp: Local::now().format("%Y%m%d_%H%M%S").to_string(),
            pending: Vec::new(),
            file: None,
        }
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!("{message}");
        self.push(message);
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::warn!("{message}");
        self.push(message);
    }

    /// Blank line plus a `=== TITLE ===` banner
    pub fn section(&mut self, title: &str) {
        self.push("");
        self.info(format!("=== {title} ==="));
    }

    fn push(&mut self, message: &str) {
        self.pending
            .push(format!("[{}] {}", Local::now().format("%H:%M:%S"), message));
    }

    /// Append everything recorded since the last checkpoint to the log file
    pub fn checkpoint(&mut self) -> Result<()> {
        if self.pending.is_empty() && self.file.is_some() {
            return Ok(());
        }

        let path = match self.file.clone() {
            Some(path) => path,
            None => {
                fs::create_dir_all(&self.log_dir)?;
                let path = self.artifact_path(&self.name, "log");
                self.file = Some(path.clone());
                path
            }
        };

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        for line in &self.pending {
            writeln!(file, "{line}")?;
        }
        self.pending.clear();
        Ok(())
    }

    /// Path for a report produced by this run, sharing the run's timestamp
    pub fn artifact_path(&self, prefix: &str, extension: &str) -> PathBuf {
        self.log_dir
            .join(format!("{prefix}_{}.{extension}", self.stamp))
    }

    /// Write the JSON summary next to the log, record both paths, and flush.
    pub fn finish<S: Serialize>(&mut self, summary: &S) -> Result<PathBuf> {
        fs::create_dir_all(&self.log_dir)?;
        let summary_path = self.artifact_path(&format!("{}_summary", self.name), "json");
        fs::write(&summary_path, serde_json::to_string_pretty(summary)?)?;

        self.checkpoint()?;
        let log_path = self.file.clone().unwrap_or_default();
        self.info(format!("Log: {}", log_path.display()));
        self.info(format!("Summary: {}", summary_path.display()));
        self.checkpoint()?;
        Ok(log_path)
    }

    /// Everything recorded so far: the log file followed by unflushed lines
    #[cfg(test)]
    pub fn text(&self) -> String {
        let mut text = self
            .file
            .as_ref()
            .map(|path| fs::read_to_string(path).unwrap_or_default())
            .unwrap_or_default();
        for line in &self.pending {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    #[cfg(test)]
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}
