//! Data models shared by the scrapers, the ledger and the pipeline.
//!
//! - [`MetadataRecord`]: one ledger row per captured document
//! - [`PageMetadata`]: meta-tag fields pulled from a document's HTML page
//! - [`Candidate`] / [`ListingPage`]: what a listing walker hands the pipeline
//! - [`CaptureOutcome`] / [`RunSummary`]: per-URL result and per-run totals

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ledger column names, in persisted order.
pub const METADATA_SCHEMA: [&str; 10] = [
    "url",
    "datetime_captured",
    "title",
    "author",
    "publication_date",
    "license",
    "file_type",
    "storage_location",
    "datetime_last_updated",
    "json_additional_metadata",
];

/// Author as published: sometimes one string, sometimes a list. Not normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Author {
    One(String),
    Many(Vec<String>),
}

/// One captured document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub url: String,
    pub datetime_captured: String,
    pub title: Option<String>,
    pub author: Option<Author>,
    pub publication_date: Option<String>,
    pub license: String,
    pub file_type: String,
    pub storage_location: String,
    pub datetime_last_updated: String,
    pub json_additional_metadata: BTreeMap<String, Value>,
}

/// Fields read from a page's `<meta>` tags. Each may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub author: Option<String>,
    pub keywords: Option<String>,
    pub description: Option<String>,
    pub title: Option<String>,
    pub date: Option<String>,
}

impl PageMetadata {
    /// Look up a field by its name, as used by `combine_metadata_descriptions`.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "author" => self.author.as_deref(),
            "keywords" => self.keywords.as_deref(),
            "description" => self.description.as_deref(),
            "title" => self.title.as_deref(),
            "date" => self.date.as_deref(),
            _ => None,
        }
    }
}

/// Where the bytes of a candidate come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Stream the response body of the candidate URL to disk.
    Stream,
    /// Fetch the body of `from` in one piece (defaults to the candidate URL).
    Whole { from: Option<String> },
    /// Extract text from the candidate page with the site's text extractor.
    PageText,
}

/// A document the listing walker proposes for capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Ledger key.
    pub url: String,
    pub filename: String,
    pub file_type: String,
    pub payload: Payload,
    pub title: Option<String>,
    pub publication_date: Option<String>,
    /// Page to read meta tags from after download; `None` skips the extra fetch.
    pub meta_page: Option<String>,
    /// Meta tags already gathered while walking the listing.
    pub meta: Option<PageMetadata>,
}

impl Candidate {
    pub fn new(url: impl Into<String>, filename: impl Into<String>, file_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
            file_type: file_type.into(),
            payload: Payload::Stream,
            title: None,
            publication_date: None,
            meta_page: None,
            meta: None,
        }
    }
}

/// One page of listing results.
///
/// `has_next == false` is the explicit end-of-results signal; transient faults
/// surface as errors from the walker instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPage {
    pub candidates: Vec<Candidate>,
    pub has_next: bool,
}

impl ListingPage {
    pub fn last(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            has_next: false,
        }
    }
}

/// Terminal state of one candidate within a run.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Already in the ledger.
    Skipped,
    /// robots.txt denies the fetch.
    Restricted,
    /// Fetch, download or parse failed; the run continues.
    Failed(String),
    /// File written and row appended.
    Captured(Box<MetadataRecord>),
}

/// Totals for one site run, written next to the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub site: String,
    pub started_at: String,
    pub finished_at: String,
    pub pages: usize,
    pub candidates: usize,
    pub captured: usize,
    pub skipped: usize,
    pub restricted: usize,
    pub failed: usize,
    pub ledger_rows: usize,
    /// Set when the walk stopped on an error rather than end of results.
    pub stopped_by: Option<String>,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &CaptureOutcome) {
        match outcome {
            CaptureOutcome::Skipped => self.skipped += 1,
            CaptureOutcome::Restricted => self.restricted += 1,
            CaptureOutcome::Failed(_) => self.failed += 1,
            CaptureOutcome::Captured(_) => self.captured += 1,
        }
    }
}
