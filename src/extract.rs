//! Metadata extraction from HTML pages.
//!
//! The generic part reads a fixed set of `<meta>` tags that most government
//! sites publish (author, keywords, description, `og:title`) plus the first
//! publication-date tag found among four common shapes. Site modules add their
//! own DOM lookups on top (sidebars, date blocks, "Updated in" notes) using
//! the helpers at the bottom of this file.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{Result, ScrapeError};
use crate::fetcher::PoliteFetcher;
use crate::models::PageMetadata;

static AUTHOR: Lazy<Selector> = Lazy::new(|| css(r#"meta[name="author"]"#));
static KEYWORDS: Lazy<Selector> = Lazy::new(|| css(r#"meta[name="keywords"]"#));
static DESCRIPTION: Lazy<Selector> = Lazy::new(|| css(r#"meta[name="description"]"#));
static OG_TITLE: Lazy<Selector> = Lazy::new(|| css(r#"meta[property="og:title"]"#));

/// Publication-date tags, probed in order; the first hit wins.
static DATE_TAGS: Lazy<[Selector; 4]> = Lazy::new(|| {
    [
        css(r#"meta[name="dc.date"]"#),
        css(r#"meta[property="article:published_time"]"#),
        css(r#"meta[itemprop="datePublished"]"#),
        css(r#"meta[name="publication_date"]"#),
    ]
});

static UPDATED_IN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Updated in (\d{4})").expect("static regex"));

/// Fields copied into `json_additional_metadata` when the caller has no preference.
pub const DEFAULT_DESCRIPTION_FIELDS: [&str; 2] = ["keywords", "description"];

fn css(selector: &str) -> Selector {
    Selector::parse(selector).expect("static selector")
}

/// Parse a selector built at runtime.
pub fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|_| ScrapeError::Selector(css.to_string()))
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .and_then(|tag| tag.value().attr("content"))
        .map(str::to_string)
}

/// First publication date found among the known meta-tag shapes.
pub fn find_meta_date(document: &Html) -> Option<String> {
    DATE_TAGS.iter().find_map(|sel| meta_content(document, sel))
}

/// Read author, keywords, description, title and date from a parsed page.
pub fn extract_from_document(document: &Html) -> PageMetadata {
    PageMetadata {
        author: meta_content(document, &AUTHOR),
        keywords: meta_content(document, &KEYWORDS),
        description: meta_content(document, &DESCRIPTION),
        title: meta_content(document, &OG_TITLE),
        date: find_meta_date(document),
    }
}

/// Read author, keywords, description, title and date from raw HTML.
pub fn extract_meta(html: &str) -> PageMetadata {
    extract_from_document(&Html::parse_document(html))
}

/// Fetch `url` politely and extract its meta tags.
///
/// Returns `Ok(None)` when robots.txt forbids the page.
#[instrument(level = "info", skip_all, fields(%url))]
pub async fn fetch_meta(fetcher: &PoliteFetcher, url: &str) -> Result<Option<PageMetadata>> {
    let Some(html) = fetcher.fetch_text(url).await? else {
        return Ok(None);
    };
    let meta = extract_meta(&html);
    debug!(?meta, "Extracted page metadata");
    Ok(Some(meta))
}

/// Project the requested, non-empty fields of `meta` into a JSON map.
pub fn combine_metadata_descriptions(meta: &PageMetadata, fields: &[&str]) -> BTreeMap<String, Value> {
    fields
        .iter()
        .filter_map(|&name| {
            meta.field(name)
                .map(|value| (name.to_string(), Value::String(value.to_string())))
        })
        .collect()
}

/// Year from an "Updated in YYYY" note.
pub fn update_year(text: &str) -> Option<String> {
    UPDATED_IN
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Text of an element: trimmed, non-empty text nodes joined by newlines.
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text of the first element matching `selector`, if any and non-empty.
pub fn text_of(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

/// `Label:` / value pairs from a sidebar-style block.
///
/// Walks every element below `root` in document order. An element whose text
/// ends with `:` opens a key; the next element with other text becomes its value.
pub fn sidebar_pairs(root: ElementRef<'_>) -> BTreeMap<String, String> {
    let mut pairs = BTreeMap::new();
    let mut current_key: Option<String> = None;

    for element in root.descendants().skip(1).filter_map(ElementRef::wrap) {
        let text = element
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(key) = text.strip_suffix(':') {
            current_key = Some(key.trim().to_string());
        } else if let Some(key) = current_key.take() {
            pairs.insert(key, text);
        }
    }
    pairs
}
