//! SAMHSA data reports.
//!
//! The "all reports" listing is paged with `?page=N` (zero-based); the pager
//! label reads "Page 1 of 206". Each report page links its files under
//! `/data/sites/` and describes itself in a sidebar of `Label:` / value
//! pairs. One listing page can yield dozens of files, so the walker visits
//! the report pages itself and hands the pipeline the files.
//!
//! The site throttles aggressively, so downloads wait 10 s and transient
//! fetch failures are retried (see the SAMHSA defaults in `config`).

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::download::{file_extension, report_prefixed_filename};
use crate::error::{Result, ScrapeError};
use crate::extract::{extract_from_document, sidebar_pairs, text_of};
use crate::models::{Candidate, ListingPage, PageMetadata, Payload};
use crate::pipeline::{CrawlContext, SiteScraper};
use crate::renderer::PageRenderer;

static PAGER: Lazy<Selector> = Lazy::new(|| Selector::parse(".pagerer-center-pane").expect("static selector"));
static REPORT_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"a[href^="/data/report/"]"#).expect("static selector"));
static FILE_LINK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        r#"a[href^="/data/sites/"][href$=".pdf"], a[href^="/data/sites/"][href$=".xlsx"], a[href^="/data/sites/"][href$=".csv"], a[href^="/data/sites/"][href$=".xls"]"#,
    )
    .expect("static selector")
});
static SIDEBAR: Lazy<Selector> = Lazy::new(|| Selector::parse("div.report-sidebar1").expect("static selector"));
static PAGE_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse(".hide-for-iframe").expect("static selector"));
static PAGE_COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"of\s*([\d,]+)").expect("static regex"));

/// What a report page contributes to each of its files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportPage {
    pub title: Option<String>,
    pub publication_date: Option<String>,
    pub files: Vec<String>,
    pub meta: PageMetadata,
}

pub struct SamhsaScraper<R> {
    renderer: R,
    /// Next listing page to read, zero-based.
    page: usize,
    /// Known once the first page has been read.
    page_count: Option<usize>,
}

impl<R: PageRenderer> SamhsaScraper<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            renderer,
            page: 0,
            page_count: None,
        }
    }

    #[instrument(level = "info", skip_all, fields(%url))]
    async fn report(&self, ctx: &CrawlContext, url: &str) -> Result<Option<ReportPage>> {
        let Some(html) = ctx.fetcher.fetch_text(url).await? else {
            return Ok(None);
        };
        let report = parse_report(&html, url)?;
        if report.publication_date.is_none() {
            warn!("Report sidebar missing; recording files without a publication date");
        }
        Ok(Some(report))
    }
}

/// "Page 1 of 1,206" → 1206.
pub fn parse_page_count(label: &str) -> Option<usize> {
    let digits: String = PAGE_COUNT
        .captures(label)?
        .get(1)?
        .as_str()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn absolute(base: &Url, href: &str) -> Option<String> {
    base.join(href).ok().map(|u| u.to_string())
}

/// Report links on a listing page, deduplicated, in page order.
pub fn parse_listing(html: &str, page_url: &str) -> Result<(Vec<String>, Option<usize>)> {
    let base = Url::parse(page_url).map_err(|e| ScrapeError::Url(format!("{page_url}: {e}")))?;
    let document = Html::parse_document(html);
    let page_count = text_of(&document, &PAGER).and_then(|label| parse_page_count(&label));
    let reports = document
        .select(&REPORT_LINK)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| absolute(&base, href))
        .unique()
        .collect();
    Ok((reports, page_count))
}

/// Files, sidebar and title of one report page.
pub fn parse_report(html: &str, page_url: &str) -> Result<ReportPage> {
    let base = Url::parse(page_url).map_err(|e| ScrapeError::Url(format!("{page_url}: {e}")))?;
    let document = Html::parse_document(html);
    let files = document
        .select(&FILE_LINK)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| absolute(&base, href))
        .unique()
        .collect();
    let publication_date = document
        .select(&SIDEBAR)
        .next()
        .map(sidebar_pairs)
        .and_then(|mut pairs| pairs.remove("Publication Date"))
        .filter(|d| !d.is_empty());
    Ok(ReportPage {
        title: text_of(&document, &PAGE_TITLE),
        publication_date,
        files,
        meta: extract_from_document(&document),
    })
}

/// One candidate per file of `report`.
pub fn report_candidates(report: &ReportPage) -> Vec<Candidate> {
    report
        .files
        .iter()
        .map(|file| {
            let filename = report_prefixed_filename(file);
            let file_type = file_extension(&filename).unwrap_or_default();
            let mut c = Candidate::new(file, filename, file_type);
            c.payload = Payload::Whole { from: None };
            c.title = report.title.clone();
            c.publication_date = report.publication_date.clone();
            c.meta = Some(report.meta.clone());
            c
        })
        .collect()
}

impl<R: PageRenderer> SiteScraper for SamhsaScraper<R> {
    fn name(&self) -> &'static str {
        "samhsa"
    }

    async fn next_page(&mut self, ctx: &CrawlContext) -> Result<ListingPage> {
        let page_url = format!("{}?page={}", ctx.config.start_url, self.page);
        if !self.renderer.open(&page_url).await? {
            self.page += 1;
            return Ok(ListingPage {
                candidates: Vec::new(),
                has_next: self.page_count.is_some_and(|n| self.page < n),
            });
        }
        let html = self.renderer.html().await?;
        let (reports, label_count) = parse_listing(&html, &page_url)?;

        if self.page_count.is_none() {
            let count = label_count.unwrap_or_else(|| {
                warn!("Pager label missing; reading one page only");
                1
            });
            info!(pages = count, "Number of listing pages");
            self.page_count = Some(count);
        }

        let mut candidates = Vec::new();
        for report_url in &reports {
            if !ctx.fetcher.can_fetch(report_url) {
                warn!(url = %report_url, "Restricted from scraping data from this URL");
                continue;
            }
            match self.report(ctx, report_url).await {
                Ok(Some(report)) => candidates.extend(report_candidates(&report)),
                Ok(None) => {}
                Err(e) => error!(url = %report_url, error = %e, "Report page failed; skipping"),
            }
        }
        info!(page = self.page, reports = reports.len(), files = candidates.len(), "Indexed listing page");

        self.page += 1;
        Ok(ListingPage {
            candidates,
            has_next: self.page_count.is_some_and(|n| self.page < n),
        })
    }

    async fn finish(&mut self) -> Result<()> {
        self.renderer.close().await
    }
}
