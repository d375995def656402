/// Duplicate-group dataset loading
///
/// Each data row of the dataset is one group of catalog entries that share a
/// visually identical image, plus the master image they should all point at.
use csv::{ReaderBuilder, StringRecord};
use std::collections::HashSet;
use std::io::ErrorKind;

use crate::config::Settings;
use crate::error::{ReconcileError, Result};
use crate::runlog::RunLog;
use crate::state::data::ImageRef;

const BOM: char = '\u{feff}';

/// One group from the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    /// 1-based position among the loaded groups
    pub index: usize,
    /// Member identifiers, trimmed and deduplicated in first-seen order
    pub members: Vec<String>,
    /// None when the master field was empty; such groups are never applied
    pub master: Option<ImageRef>,
    /// Known non-master copies, informational only
    pub known_duplicates: Vec<ImageRef>,
}

impl DuplicateGroup {
    pub fn is_eligible(&self) -> bool {
        self.master.is_some()
    }

    /// Master filename, or "(none)" for an ineligible group
    pub fn master_filename(&self) -> &str {
        self.master.as_ref().map_or("(none)", |m| m.filename())
    }
}

/// All groups loaded from one dataset file
#[derive(Debug, Default)]
pub struct Dataset {
    pub groups: Vec<DuplicateGroup>,
    /// Rows whose field count did not match the header
    pub malformed_rows: usize,
    /// Groups loaded with an empty master field
    pub missing_master: usize,
}

impl Dataset {
    /// Load and validate the dataset at `settings.dataset_path`.
    ///
    /// Only a missing file (or one without the required columns) is fatal;
    /// malformed rows are skipped and counted.
    pub fn load(settings: &Settings, log: &mut RunLog) -> Result<Self> {
        let path = settings.dataset_path.as_path();
        if !path.is_file() {
            return Err(ReconcileError::DatasetUnavailable(path.to_path_buf()));
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|err| match err.kind() {
                csv::ErrorKind::Io(io) if io.kind() == ErrorKind::NotFound => {
                    ReconcileError::DatasetUnavailable(path.to_path_buf())
                }
                _ => ReconcileError::Csv(err),
            })?;

        log.info(format!("Loading dataset {}...", path.display()));

        let mut records = reader.records();
        let header = match records.next() {
            Some(header) => header?,
            None => return Err(ReconcileError::EmptyDataset),
        };
        let columns = Columns::resolve(&header, settings)?;

        let mut dataset = Dataset::default();
        for (row, record) in records.enumerate() {
            // +2: 1-based, and the header is line 1
            let line = row + 2;
            let record = match record {
                Ok(record) => record,
                Err(err) if err.is_io_error() => return Err(err.into()),
                Err(err) => {
                    log.warn(format!("Skipping unreadable row {line}: {err}"));
                    dataset.malformed_rows += 1;
                    continue;
                }
            };

            if record.len() != header.len() {
                log.warn(format!(
                    "Skipping malformed row {line}: {} fields, expected {}",
                    record.len(),
                    header.len()
                ));
                dataset.malformed_rows += 1;
                continue;
            }

            let group = columns.group(&record, dataset.groups.len() + 1, settings.member_delimiter);
            if !group.is_eligible() {
                log.warn(format!(
                    "Group {} has no master image; loaded for audit only",
                    group.index
                ));
                dataset.missing_master += 1;
            }
            dataset.groups.push(group);
        }

        log.info(format!("Loaded {} groups", dataset.groups.len()));
        if dataset.malformed_rows > 0 {
            log.warn(format!("Malformed rows skipped: {}", dataset.malformed_rows));
        }
        Ok(dataset)
    }

    /// Sum of unique members per group
    pub fn member_count(&self) -> usize {
        self.groups.iter().map(|g| g.members.len()).sum()
    }

    /// Every member identifier that appears anywhere in the dataset
    pub fn distinct_members(&self) -> HashSet<&str> {
        self.groups
            .iter()
            .flat_map(|g| g.members.iter().map(String::as_str))
            .collect()
    }

    /// Filenames of every group's master image. These are never deleted.
    pub fn protected_filenames(&self) -> HashSet<String> {
        self.groups
            .iter()
            .filter_map(|g| g.master.as_ref())
            .map(|m| m.filename().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

/// Column positions resolved from the header row
struct Columns {
    members: usize,
    master: usize,
    duplicates: Option<usize>,
}

impl Columns {
    fn resolve(header: &StringRecord, settings: &Settings) -> Result<Self> {
        let names: Vec<&str> = header
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let name = if i == 0 { name.trim_start_matches(BOM) } else { name };
                name.trim()
            })
            .collect();

        let find = |wanted: &str| names.iter().position(|name| *name == wanted);
        let required = |wanted: &str| {
            find(wanted).ok_or_else(|| ReconcileError::MissingColumn(wanted.to_string()))
        };

        Ok(Self {
            members: required(settings.members_column.as_str())?,
            master: required(settings.master_column.as_str())?,
            duplicates: find(settings.duplicates_column.as_str()),
        })
    }

    fn group(&self, record: &StringRecord, index: usize, delimiter: char) -> DuplicateGroup {
        let field = |i: usize| record.get(i).unwrap_or("");

        let mut seen = HashSet::new();
        let members = field(self.members)
            .split(delimiter)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .filter(|m| seen.insert(m.to_string()))
            .map(str::to_string)
            .collect();

        let master = field(self.master).trim();
        let master = (!master.is_empty()).then(|| ImageRef::new(master));

        let known_duplicates = self
            .duplicates
            .map(|i| {
                field(i)
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(ImageRef::new)
                    .collect()
            })
            .unwrap_or_default();

        DuplicateGroup {
            index,
            members,
            master,
            known_duplicates,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    /// Write `contents` as a dataset file and return settings pointing at it
    pub(crate) fn dataset_settings(dir: &Path, contents: &str) -> Settings {
        let path = dir.join("visual_duplicates.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        Settings {
            dataset_path: path,
            log_dir: dir.join("logs"),
            ..Settings::default()
        }
    }

    #[test]
    fn test_bom_header_and_member_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dataset_settings(
            dir.path(),
            "\u{feff}skus,master_image_to_keep,images_to_delete\n\
             \"A100, A100 ,B200\",https://shop.example/img/m.jpg ,\"https://shop.example/img/d1.jpg\nhttps://shop.example/img/d2.jpg\"\n",
        );
        let mut log = RunLog::new(&settings.log_dir, "test");

        let dataset = Dataset::load(&settings, &mut log).unwrap();
        assert_eq!(dataset.groups.len(), 1);

        let group = &dataset.groups[0];
        assert_eq!(group.index, 1);
        assert_eq!(group.members, vec!["A100", "B200"]);
        assert_eq!(group.master, Some(ImageRef::new("https://shop.example/img/m.jpg")));
        assert_eq!(group.known_duplicates.len(), 2);
        assert_eq!(dataset.member_count(), 2);
    }

    #[test]
    fn test_malformed_rows_and_missing_master() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dataset_settings(
            dir.path(),
            "skus,master_image_to_keep\n\
             A1,https://shop.example/a.jpg\n\
             B1,https://shop.example/b.jpg,extra\n\
             C1,   \n\
             D1\n",
        );
        let mut log = RunLog::new(&settings.log_dir, "test");

        let dataset = Dataset::load(&settings, &mut log).unwrap();
        assert_eq!(dataset.malformed_rows, 2);
        assert_eq!(dataset.missing_master, 1);
        assert_eq!(dataset.groups.len(), 2);
        assert!(!dataset.groups[1].is_eligible());
        assert_eq!(dataset.groups[1].index, 2);
        assert_eq!(
            dataset.protected_filenames(),
            HashSet::from(["a.jpg".to_string()])
        );
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            dataset_path: dir.path().join("absent.csv"),
            ..Settings::default()
        };
        let mut log = RunLog::new(dir.path(), "test");

        let err = Dataset::load(&settings, &mut log).unwrap_err();
        assert!(matches!(err, ReconcileError::DatasetUnavailable(_)));
    }

    #[test]
    fn test_missing_required_column() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dataset_settings(dir.path(), "sku_list,master\nA1,x.jpg\n");
        let mut log = RunLog::new(&settings.log_dir, "test");

        let err = Dataset::load(&settings, &mut log).unwrap_err();
        assert!(matches!(err, ReconcileError::MissingColumn(c) if c == "skus"));
    }

    #[test]
    fn test_distinct_members_span_groups() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dataset_settings(
            dir.path(),
            "skus,master_image_to_keep\n\
             \"A1,B1\",https://shop.example/a.jpg\n\
             \"B1,C1\",https://shop.example/c.jpg\n",
        );
        let mut log = RunLog::new(&settings.log_dir, "test");

        let dataset = Dataset::load(&settings, &mut log).unwrap();
        assert_eq!(dataset.member_count(), 4);
        assert_eq!(dataset.distinct_members().len(), 3);
    }
}
