use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Settings;
use crate::dataset::Dataset;
use crate::import;
use crate::pipeline::{audit, reassign, reclaim};
use crate::runlog::RunLog;
use crate::state::library::Library;

/// Consolidate duplicate product images onto master images and reclaim the orphans
#[derive(Parser, Debug)]
#[command(name = "image-consolidator", version, about)]
pub struct Cli {
    /// JSON settings file
    #[arg(long, global = true, env = "IMAGE_CONSOLIDATOR_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite catalog database
    #[arg(long, global = true, env = "IMAGE_CONSOLIDATOR_DB")]
    db: Option<PathBuf>,

    /// Duplicate-group dataset (CSV)
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,

    /// Directory for run logs and reports
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Point every group member at its group's master image
    Reassign {
        #[arg(long, value_enum)]
        stage: reassign::Stage,
    },
    /// Find (and optionally delete) images no catalog entry references
    Reclaim {
        #[arg(long, value_enum)]
        mode: reclaim::Mode,

        /// Filename substring marking an orphan as deletable (repeatable)
        #[arg(long = "pattern", allow_hyphen_values = true)]
        patterns: Vec<String>,

        /// Size multiplier used to estimate derived variants
        #[arg(long)]
        variant_multiplier: Option<f64>,
    },
    /// Verify catalog state against the dataset
    Audit,
    /// Register the images under an uploads folder as assets
    ImportAssets {
        /// Uploads folder to scan
        #[arg(long)]
        root: PathBuf,

        /// Public URL the uploads folder is served from
        #[arg(long)]
        base_url: String,
    },
}

impl Cli {
    /// Settings file (or defaults) with command line overrides applied
    fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())
            .with_context(|| "failed to load settings")?;

        if let Some(db) = &self.db {
            settings.db_path = db.clone();
        }
        if let Some(dataset) = &self.dataset {
            settings.dataset_path = dataset.clone();
        }
        if let Some(log_dir) = &self.log_dir {
            settings.log_dir = log_dir.clone();
        }
        if let Commands::Reclaim {
            patterns,
            variant_multiplier,
            ..
        } = &self.command
        {
            if !patterns.is_empty() {
                settings.candidate_patterns = patterns.clone();
            }
            if let Some(multiplier) = variant_multiplier {
                settings.variant_size_multiplier = *multiplier;
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn run(self) -> anyhow::Result<()> {
        let settings = self.settings()?;

        match self.command {
            Commands::Reassign { stage } => {
                let mut log = RunLog::new(
                    &settings.log_dir,
                    &format!("consolidator_stage_{}", stage.as_str()),
                );
                log.section(&format!("IMAGE CONSOLIDATOR: {}", stage.as_str().to_uppercase()));

                // Nothing is opened or written until the dataset loads
                let dataset = Dataset::load(&settings, &mut log)?;
                let mut library = open_library(&settings)?;

                let plan = reassign::Plan::for_stage(stage, &settings);
                let counters = reassign::run(&mut library, &dataset, plan, &mut log)?;
                reassign::log_summary(stage, &counters, &mut log);
                log.finish(&counters)?;
            }
            Commands::Reclaim { mode, .. } => {
                let patterns = settings.require_candidate_patterns()?;
                let mut log =
                    RunLog::new(&settings.log_dir, &format!("cleanup_{}", mode.as_str()));
                log.section(&format!("UNUSED IMAGE CLEANUP: {}", mode.as_str().to_uppercase()));

                let dataset = Dataset::load(&settings, &mut log)?;
                let mut library = open_library(&settings)?;

                let reclamation =
                    reclaim::run(&mut library, &dataset, &settings, patterns, mode, &mut log)?;
                reclaim::log_summary(mode, &reclamation, &mut log);
                log.finish(&reclamation.counters)?;
            }
            Commands::Audit => {
                let mut log = RunLog::new(&settings.log_dir, "audit");
                log.section("IMAGE AUDIT REPORT");

                let dataset = Dataset::load(&settings, &mut log)?;
                let library = open_library(&settings)?;

                let report = audit::run(&library, &dataset, &settings, &mut log)?;
                log.finish(&report)?;
            }
            Commands::ImportAssets { root, base_url } => {
                anyhow::ensure!(root.is_dir(), "uploads folder {} does not exist", root.display());
                let library = open_library(&settings)?;
                let result = import::import_folder(&library, &root, &base_url)?;
                println!(
                    "Import complete: {} new, {} skipped, {} variants, {} errors",
                    result.imported_count,
                    result.skipped_count,
                    result.variant_count,
                    result.error_count
                );
            }
        }
        Ok(())
    }
}

fn open_library(settings: &Settings) -> anyhow::Result<Library> {
    let library = Library::open(&settings.db_path).with_context(|| {
        format!("failed to open catalog database {}", settings.db_path.display())
    })?;
    tracing::info!(path = %library.path().display(), "catalog database ready");
    Ok(library)
}
