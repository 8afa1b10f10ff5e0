//! The dedup ledger: every document captured for a site, one row each.
//!
//! The ledger is loaded once at the start of a site run, grows in memory as
//! documents are captured, and is rewritten in full at the end. Membership is
//! an exact URL match against a hash index, so checks are O(1); rows keep
//! their insertion order for the persisted file.
//!
//! # File format
//!
//! CSV with a header row naming the ten columns of
//! [`METADATA_SCHEMA`](crate::models::METADATA_SCHEMA), in that order. Empty
//! cells are `None`, so blank `title`, `author` and `publication_date` values
//! are stored as `None` when appended. `author` holds JSON: a string for one
//! author, an array for several. Rows from older files with a bare author
//! string still load. `json_additional_metadata` holds a JSON object.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, ScrapeError};
use crate::models::{Author, MetadataRecord};
use crate::utils::non_blank;

/// Flat CSV shape of a [`MetadataRecord`]. Field order is the column order.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerRow {
    url: String,
    datetime_captured: String,
    title: Option<String>,
    author: Option<String>,
    publication_date: Option<String>,
    license: String,
    file_type: String,
    storage_location: String,
    datetime_last_updated: String,
    json_additional_metadata: Option<String>,
}

impl LedgerRow {
    fn from_record(record: &MetadataRecord) -> Result<Self> {
        let author = record.author.as_ref().map(serde_json::to_string).transpose()?;
        Ok(Self {
            url: record.url.clone(),
            datetime_captured: record.datetime_captured.clone(),
            title: record.title.clone(),
            author,
            publication_date: record.publication_date.clone(),
            license: record.license.clone(),
            file_type: record.file_type.clone(),
            storage_location: record.storage_location.clone(),
            datetime_last_updated: record.datetime_last_updated.clone(),
            json_additional_metadata: Some(serde_json::to_string(&record.json_additional_metadata)?),
        })
    }

    fn into_record(self) -> Result<MetadataRecord> {
        let author = self
            .author
            .map(|raw| serde_json::from_str::<Author>(&raw).unwrap_or_else(|_| Author::One(raw)));
        let json_additional_metadata = match self.json_additional_metadata.as_deref() {
            None | Some("") => BTreeMap::new(),
            Some(raw) => serde_json::from_str::<BTreeMap<String, Value>>(raw)?,
        };
        Ok(MetadataRecord {
            url: self.url,
            datetime_captured: self.datetime_captured,
            title: self.title,
            author,
            publication_date: self.publication_date,
            license: self.license,
            file_type: self.file_type,
            storage_location: self.storage_location,
            datetime_last_updated: self.datetime_last_updated,
            json_additional_metadata,
        })
    }
}

/// In-memory ledger with an exact-match URL index.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    records: Vec<MetadataRecord>,
    index: HashSet<String>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the ledger at `path`, or start empty if the file does not exist.
    ///
    /// Duplicate URLs already present in the file are kept as rows (they were
    /// written by older runs) but only indexed once.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            info!("No ledger yet; starting empty");
            return Ok(Self::new());
        }

        let mut reader = csv::Reader::from_path(path)?;
        let mut ledger = Self::new();
        let mut duplicates = 0usize;
        for row in reader.deserialize::<LedgerRow>() {
            let record = row?.into_record()?;
            if !ledger.index.insert(record.url.clone()) {
                duplicates += 1;
            }
            ledger.records.push(record);
        }
        if duplicates > 0 {
            warn!(duplicates, "Ledger file contains repeated URLs");
        }
        info!(rows = ledger.records.len(), "Loaded ledger");
        Ok(ledger)
    }

    /// Rewrite the whole ledger at `path`, creating parent directories.
    ///
    /// Writes to a sibling temp file first and renames it into place.
    #[instrument(level = "info", skip_all, fields(path = %path.display(), rows = self.records.len()))]
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ScrapeError::io(parent, e))?;
        }
        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            if self.is_empty() {
                writer.write_record(crate::models::METADATA_SCHEMA)?;
            }
            for record in &self.records {
                writer.serialize(LedgerRow::from_record(record)?)?;
            }
            writer.flush().map_err(|e| ScrapeError::io(&tmp, e))?;
        }
        fs::rename(&tmp, path).map_err(|e| ScrapeError::io(path, e))?;
        info!("Wrote ledger");
        Ok(())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.index.contains(url)
    }

    /// Append `record` unless its URL is already present. Returns whether it was added.
    pub fn append(&mut self, mut record: MetadataRecord) -> bool {
        if !self.index.insert(record.url.clone()) {
            debug!(url = %record.url, "Refusing duplicate ledger row");
            return false;
        }
        record.title = non_blank(record.title);
        record.publication_date = non_blank(record.publication_date);
        record.author = match record.author {
            Some(Author::One(name)) => non_blank(Some(name)).map(Author::One),
            other => other,
        };
        self.records.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MetadataRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::METADATA_SCHEMA;
    use tempfile::TempDir;

    fn record(url: &str) -> MetadataRecord {
        let mut extra = BTreeMap::new();
        extra.insert("keywords".to_string(), Value::String("flu, \"h5n1\"".into()));
        MetadataRecord {
            url: url.to_string(),
            datetime_captured: "2024-03-01 10:11:12.123456".into(),
            title: Some("Avian influenza, field notes".into()),
            author: Some(Author::One("CDC".into())),
            publication_date: None,
            license: "Public Domain".into(),
            file_type: "pdf".into(),
            storage_location: "/corpus/raw/x/a.pdf".into(),
            datetime_last_updated: "2024-03-01 10:11:12.123456".into(),
            json_additional_metadata: extra,
        }
    }

    #[test]
    fn test_append_rejects_duplicates() {
        let mut ledger = Ledger::new();
        assert!(ledger.append(record("https://x/a.pdf")));
        assert!(!ledger.append(record("https://x/a.pdf")));
        assert!(ledger.contains("https://x/a.pdf"));
        assert!(!ledger.contains("https://x/a"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::load(&dir.path().join("nope.csv")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_round_trip_preserves_rows_and_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("log_site.csv");

        let mut ledger = Ledger::new();
        ledger.append(record("https://x/a.pdf"));
        let mut second = record("https://x/b.xlsx");
        second.author = Some(Author::Many(vec!["A. Smith".into(), "B. Jones".into()]));
        second.title = None;
        second.publication_date = Some("June 2023".into());
        second.json_additional_metadata.clear();
        ledger.append(second);
        let mut third = record("https://x/c.txt");
        third.author = None;
        ledger.append(third);
        let mut fourth = record("https://x/d.pdf");
        fourth.title = Some(String::new());
        fourth.author = Some(Author::One("[\"not\", \"a list\"]".into()));
        ledger.append(fourth);
        assert_eq!(ledger.records()[3].title, None);
        ledger.save(&path).unwrap();

        let reloaded = Ledger::load(&path).unwrap();
        assert_eq!(reloaded.len(), 4);
        assert_eq!(reloaded.records(), ledger.records());
        assert!(reloaded.contains("https://x/b.xlsx"));

        let text = fs::read_to_string(&path).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, METADATA_SCHEMA.join(","));
    }

    #[test]
    fn test_loads_bare_author_strings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log_old.csv");
        let text = format!(
            "{}\nhttps://x/a.pdf,2024-01-01 00:00:00.000000,A,CDC,,Public Domain,pdf,/a.pdf,2024-01-01 00:00:00.000000,{{}}\n",
            METADATA_SCHEMA.join(",")
        );
        fs::write(&path, text).unwrap();

        let ledger = Ledger::load(&path).unwrap();
        assert_eq!(ledger.records()[0].author, Some(Author::One("CDC".into())));
        assert_eq!(ledger.records()[0].publication_date, None);
    }

    #[test]
    fn test_empty_ledger_still_writes_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log_empty.csv");
        Ledger::new().save(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), METADATA_SCHEMA.join(","));
        assert!(Ledger::load(&path).unwrap().is_empty());
    }
}
