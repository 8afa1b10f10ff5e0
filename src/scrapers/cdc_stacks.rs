//! CDC Stacks digital repository.
//!
//! Stacks holds far more than we want, so the crawl is a series of advanced
//! searches (collection, document type, language, date range). Each search is
//! paged 20 results at a time through the `#next` control. Result links point
//! at detail pages; the detail page names the file through the action of its
//! download form.
//!
//! # Selectors
//!
//! | What              | Where                                   |
//! |-------------------|-----------------------------------------|
//! | collection        | `#edit-fedora_terms10` (select)         |
//! | document type     | `#edit-fedora_terms9` (select)          |
//! | language          | `#edit-fedora_terms5` (select)          |
//! | date from / to    | `#fedora_terms6` / `#fedora_terms7`     |
//! | search            | `#searchButtonAdvanced`                 |
//! | result links      | `#paginationSubmit0` .. `#paginationSubmit19` |
//! | next page         | `#next`                                 |

use chrono::Local;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{info, instrument, warn};
use url::Url;

use crate::config::StacksSearch;
use crate::download::{file_extension, filename_from_url};
use crate::error::{Result, ScrapeError};
use crate::extract::{element_text, extract_from_document};
use crate::models::{Candidate, ListingPage, Payload};
use crate::pipeline::{CrawlContext, SiteScraper};
use crate::renderer::{PageAction, PageRenderer, wait_for};

/// Results per page.
const PAGE_SIZE: usize = 20;

static RESULT_LINKS: Lazy<Vec<Selector>> = Lazy::new(|| {
    (0..PAGE_SIZE)
        .map(|i| Selector::parse(&format!("#paginationSubmit{i}")).expect("static selector"))
        .collect()
});
static NEXT: Lazy<Selector> = Lazy::new(|| Selector::parse("#next").expect("static selector"));
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("div.stacks-flex").expect("static selector"));
static DATE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.col-3.bookHeaderListData").expect("static selector"));
static DOWNLOAD_FORM: Lazy<Selector> =
    Lazy::new(|| Selector::parse("form#download-document[action]").expect("static selector"));

/// Facts read from a Stacks detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StacksDetail {
    pub title: Option<String>,
    pub date: Option<String>,
    /// Download URL resolved against the detail page.
    pub file_url: String,
}

pub struct CdcStacksScraper<R> {
    renderer: R,
    searches: Vec<StacksSearch>,
    /// Index of the search currently being paged.
    search: usize,
    /// Whether the current search's results are on screen.
    in_search: bool,
}

impl<R: PageRenderer> CdcStacksScraper<R> {
    pub fn new(renderer: R, searches: Vec<StacksSearch>) -> Self {
        Self {
            renderer,
            searches,
            search: 0,
            in_search: false,
        }
    }

    /// Open the search form, fill it for `search` and submit.
    #[instrument(level = "info", skip_all, fields(collection = %search.collection, document_type = %search.document_type))]
    async fn start_search(&mut self, ctx: &CrawlContext, search: &StacksSearch) -> Result<bool> {
        if !self.renderer.open(&ctx.config.start_url).await? {
            return Ok(false);
        }
        for action in search_actions(search, &today()) {
            if !self.renderer.perform(&action).await? {
                warn!(?action, "Search form control missing");
                return Ok(false);
            }
        }
        self.renderer
            .perform(&PageAction::Wait(ctx.config.page_settle))
            .await?;
        Ok(true)
    }
}

fn today() -> String {
    Local::now().format("%m/%d/%Y").to_string()
}

/// Form actions for one search. Empty filters are left untouched.
pub fn search_actions(search: &StacksSearch, end_date: &str) -> Vec<PageAction> {
    let mut actions = Vec::new();
    if !search.collection.is_empty() {
        actions.push(PageAction::select("#edit-fedora_terms10", &search.collection));
    }
    if !search.document_type.is_empty() {
        actions.push(PageAction::select("#edit-fedora_terms9", &search.document_type));
    }
    if !search.language.is_empty() {
        actions.push(PageAction::select("#edit-fedora_terms5", &search.language));
    }
    if !search.start_date.is_empty() {
        actions.push(PageAction::fill("#fedora_terms6", &search.start_date));
    }
    if !end_date.is_empty() {
        actions.push(PageAction::fill("#fedora_terms7", end_date));
    }
    actions.push(PageAction::click("#searchButtonAdvanced"));
    actions
}

/// Result links on a search page, resolved against `page_url`.
pub fn parse_results(html: &str, page_url: &str) -> (Vec<String>, bool) {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();
    let links = RESULT_LINKS
        .iter()
        .filter_map(|sel| document.select(sel).next())
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| match &base {
            Some(base) => base.join(href).ok().map(|u| u.to_string()),
            None => Some(href.to_string()),
        })
        .collect();
    let has_next = document.select(&NEXT).next().is_some();
    (links, has_next)
}

/// Title, date and download URL from a detail page.
pub fn parse_detail(html: &str, page_url: &str) -> Result<StacksDetail> {
    let document = Html::parse_document(html);
    let action = document
        .select(&DOWNLOAD_FORM)
        .next()
        .and_then(|form| form.value().attr("action"))
        .ok_or_else(|| ScrapeError::MissingElement {
            selector: "form#download-document[action]".to_string(),
            url: page_url.to_string(),
        })?;
    let file_url = Url::parse(page_url)
        .and_then(|base| base.join(action))
        .map_err(|e| ScrapeError::Url(format!("{action}: {e}")))?
        .to_string();

    let text = |sel: &Selector| {
        document
            .select(sel)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
    };
    Ok(StacksDetail {
        title: text(&TITLE),
        date: text(&DATE),
        file_url,
    })
}

impl<R: PageRenderer> SiteScraper for CdcStacksScraper<R> {
    fn name(&self) -> &'static str {
        "cdc-stacks"
    }

    async fn next_page(&mut self, ctx: &CrawlContext) -> Result<ListingPage> {
        loop {
            if self.in_search {
                // Results of the previous page were handed out; advance.
                self.renderer
                    .perform(&PageAction::Wait(ctx.config.page_settle))
                    .await?;
                if !self.renderer.perform(&PageAction::click("#next")).await? {
                    info!(search = self.search, "Search exhausted");
                    self.in_search = false;
                    self.search += 1;
                    continue;
                }
            } else {
                let Some(search) = self.searches.get(self.search).cloned() else {
                    return Ok(ListingPage::last(Vec::new()));
                };
                if !self.start_search(ctx, &search).await? {
                    self.search += 1;
                    continue;
                }
                self.in_search = true;
            }

            let html = wait_for(
                &mut self.renderer,
                "#paginationSubmit0",
                ctx.config.listing_retries,
                ctx.config.listing_retry_delay,
            )
            .await?;
            let page_url = self.renderer.current_url().unwrap_or(&ctx.config.start_url).to_string();
            let (links, has_next_control) = parse_results(&html, &page_url);
            info!(count = links.len(), search = self.search, "Indexed search results");

            let more_searches = self.search + 1 < self.searches.len();
            let candidates = links
                .into_iter()
                .map(|link| {
                    let mut c = Candidate::new(&link, "", "");
                    c.meta_page = Some(link);
                    c
                })
                .collect();
            return Ok(ListingPage {
                candidates,
                has_next: has_next_control || more_searches,
            });
        }
    }

    /// Visit the detail page for the download URL, title and date.
    #[instrument(level = "info", skip_all, fields(url = %candidate.url))]
    async fn resolve(&mut self, ctx: &CrawlContext, mut candidate: Candidate) -> Result<Option<Candidate>> {
        let Some(html) = ctx.fetcher.fetch_text(&candidate.url).await? else {
            return Ok(None);
        };
        let detail = parse_detail(&html, &candidate.url)?;
        let filename = filename_from_url(&detail.file_url);

        candidate.file_type = file_extension(&filename).unwrap_or_else(|| "pdf".to_string());
        candidate.filename = filename;
        candidate.title = detail.title;
        candidate.publication_date = detail.date;
        candidate.payload = Payload::Whole {
            from: Some(detail.file_url),
        };
        candidate.meta = Some(extract_from_document(&Html::parse_document(&html)));
        candidate.meta_page = None;
        Ok(Some(candidate))
    }

    async fn finish(&mut self) -> Result<()> {
        self.renderer.close().await
    }
}
