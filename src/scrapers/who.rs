//! World Health Organization publications and fact sheets.
//!
//! # Documents
//!
//! The publications page is a Kendo grid driven by script. For each wanted
//! document type the walker opens the type dropdown, picks the type, then
//! pages with the right-arrow control until it is disabled. Each grid row
//! gives a download link, a title, a publication page and a date; rows
//! without a download link are skipped.
//!
//! # Fact sheets
//!
//! A static A-Z index links every fact sheet. Each sheet is captured as the
//! plain text of its content rows, saved as `<slug>.txt`.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{info, instrument, warn};
use url::Url;

use crate::download::sanitize_title;
use crate::error::{Result, ScrapeError};
use crate::extract::{element_text, text_of};
use crate::models::{Candidate, ListingPage, Payload};
use crate::pipeline::{CrawlContext, PageText, SiteScraper};
use crate::renderer::{PageAction, PageRenderer, wait_for};

static DOWNLOAD_URL: Lazy<Selector> = Lazy::new(|| Selector::parse(".download-url").expect("static selector"));
static ITEM_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".sf-publications-item__title").expect("static selector"));
static PAGE_URL: Lazy<Selector> = Lazy::new(|| Selector::parse(".page-url").expect("static selector"));
static ITEM_DATE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".sf-publications-item__date").expect("static selector"));
static NEXT_ARROW: Lazy<Selector> = Lazy::new(|| Selector::parse(".k-i-arrow-60-right").expect("static selector"));

static FACT_SHEET_LINK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"li.alphabetical-nav--list-item a[href^="/news-room/fact-sheets"]"#).expect("static selector")
});
static SHEET_CONTENT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.row.sf-detail-content").expect("static selector"));
static SHEET_DATE: Lazy<Selector> = Lazy::new(|| Selector::parse("div.date").expect("static selector"));

const TYPE_DROPDOWN: &str = ".k-i-arrow-60-down";
const TYPE_OPTIONS: &str = ".k-list-container";
const NEXT_CONTROL: &str = ".k-i-arrow-60-right";

/// "12 March 2024" → "2024-03-12". Anything else is returned unchanged.
pub fn normalize_date(raw: &str) -> String {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%d %B %Y")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| {
            warn!(date = %raw, "Unrecognised date; keeping it as published");
            raw.to_string()
        })
}

fn absolute(base: Option<&Url>, href: &str) -> Option<String> {
    match base {
        Some(base) => base.join(href).ok().map(|u| u.to_string()),
        None => Some(href.to_string()),
    }
}

fn is_disabled(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take(3)
        .chain(std::iter::once(element))
        .any(|e| e.value().classes().any(|c| c == "k-state-disabled" || c == "k-disabled"))
}

/// Grid rows on a documents page, plus whether an enabled next arrow exists.
pub fn parse_documents(html: &str, page_url: &str) -> (Vec<Candidate>, bool) {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();

    let titles: Vec<Option<String>> = document
        .select(&ITEM_TITLE)
        .map(|e| e.value().attr("title").map(str::to_string))
        .collect();
    let pages: Vec<Option<String>> = document
        .select(&PAGE_URL)
        .map(|e| e.value().attr("href").and_then(|h| absolute(base.as_ref(), h)))
        .collect();
    let dates: Vec<String> = document.select(&ITEM_DATE).map(element_text).collect();

    let mut candidates = Vec::new();
    for (i, link) in document.select(&DOWNLOAD_URL).enumerate() {
        let Some(url) = link.value().attr("href").and_then(|h| absolute(base.as_ref(), h)) else {
            continue;
        };
        let title = titles.get(i).cloned().flatten();
        let filename = format!("{}.pdf", sanitize_title(title.as_deref().unwrap_or("untitled")));
        let mut candidate = Candidate::new(url, filename, "pdf");
        candidate.title = title;
        candidate.publication_date = dates.get(i).filter(|d| !d.is_empty()).map(|d| normalize_date(d));
        candidate.meta_page = pages.get(i).cloned().flatten();
        candidates.push(candidate);
    }

    let has_next = document.select(&NEXT_ARROW).next().is_some_and(|e| !is_disabled(e));
    (candidates, has_next)
}

pub struct WhoDocumentsScraper<R> {
    renderer: R,
    document_types: Vec<String>,
    /// Index of the document type being paged.
    current: usize,
    in_type: bool,
}

impl<R: PageRenderer> WhoDocumentsScraper<R> {
    pub fn new(renderer: R, document_types: Vec<String>) -> Self {
        Self {
            renderer,
            document_types,
            current: 0,
            in_type: false,
        }
    }

    #[instrument(level = "info", skip(self, ctx))]
    async fn select_type(&mut self, ctx: &CrawlContext, doc_type: &str) -> Result<bool> {
        if !self.renderer.open(&ctx.config.start_url).await? {
            return Ok(false);
        }
        let settle = PageAction::Wait(ctx.config.page_settle);
        for action in [
            PageAction::click(TYPE_DROPDOWN),
            settle.clone(),
            PageAction::click_text(TYPE_OPTIONS, doc_type),
            settle,
        ] {
            if !self.renderer.perform(&action).await? {
                warn!(?action, "Document type filter unavailable");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl<R: PageRenderer> SiteScraper for WhoDocumentsScraper<R> {
    fn name(&self) -> &'static str {
        "who-documents"
    }

    async fn next_page(&mut self, ctx: &CrawlContext) -> Result<ListingPage> {
        loop {
            if self.in_type {
                if !self.renderer.perform(&PageAction::click(NEXT_CONTROL)).await? {
                    self.in_type = false;
                    self.current += 1;
                    continue;
                }
                self.renderer
                    .perform(&PageAction::Wait(ctx.config.page_settle))
                    .await?;
            } else {
                let Some(doc_type) = self.document_types.get(self.current).cloned() else {
                    return Ok(ListingPage::last(Vec::new()));
                };
                if !self.select_type(ctx, &doc_type).await? {
                    self.current += 1;
                    continue;
                }
                self.in_type = true;
            }

            let html = wait_for(
                &mut self.renderer,
                ".download-url",
                ctx.config.listing_retries,
                ctx.config.listing_retry_delay,
            )
            .await?;
            let page_url = self.renderer.current_url().unwrap_or(&ctx.config.start_url).to_string();
            let (candidates, has_next_arrow) = parse_documents(&html, &page_url);
            info!(count = candidates.len(), doc_type = ?self.document_types.get(self.current), "Indexed documents");

            if !has_next_arrow {
                self.in_type = false;
                self.current += 1;
            }
            let has_next = self.in_type || self.current < self.document_types.len();
            return Ok(ListingPage { candidates, has_next });
        }
    }

    async fn finish(&mut self) -> Result<()> {
        self.renderer.close().await
    }
}

/// Fact-sheet links on the A-Z index page.
pub fn parse_fact_sheet_index(html: &str, page_url: &str) -> Result<Vec<Candidate>> {
    let base = Url::parse(page_url).map_err(|e| ScrapeError::Url(format!("{page_url}: {e}")))?;
    let document = Html::parse_document(html);
    let candidates = document
        .select(&FACT_SHEET_LINK)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .map(|url| {
            let slug = url
                .path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
                .unwrap_or_default();
            let mut c = Candidate::new(url.to_string(), format!("{slug}.txt"), "txt");
            c.payload = Payload::PageText;
            c
        })
        .collect();
    Ok(candidates)
}

/// Text of a fact sheet: all content rows, each newline-joined, concatenated.
pub fn fact_sheet_text(document: &Html) -> PageText {
    let text = document.select(&SHEET_CONTENT).map(element_text).collect::<String>();
    PageText {
        text,
        publication_date: text_of(document, &SHEET_DATE).map(|d| normalize_date(&d)),
    }
}

pub struct WhoFactSheetsScraper<R> {
    renderer: R,
}

impl<R: PageRenderer> WhoFactSheetsScraper<R> {
    pub fn new(renderer: R) -> Self {
        Self { renderer }
    }
}

impl<R: PageRenderer> SiteScraper for WhoFactSheetsScraper<R> {
    fn name(&self) -> &'static str {
        "who-fact-sheets"
    }

    async fn next_page(&mut self, ctx: &CrawlContext) -> Result<ListingPage> {
        let start_url = &ctx.config.start_url;
        if !self.renderer.open(start_url).await? {
            return Ok(ListingPage::last(Vec::new()));
        }
        let html = self.renderer.html().await?;
        let candidates = parse_fact_sheet_index(&html, start_url)?;
        info!(count = candidates.len(), "Indexed fact sheets");
        Ok(ListingPage::last(candidates))
    }

    fn page_text(&self, document: &Html) -> Result<PageText> {
        Ok(fact_sheet_text(document))
    }

    async fn finish(&mut self) -> Result<()> {
        self.renderer.close().await
    }
}
