//! CDC Epidemic Intelligence Service case studies.
//!
//! A single static page lists every case study as a PDF link. The note
//! "Updated in YYYY" next to a link is the only date the site publishes.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{info, instrument, warn};
use url::Url;

use crate::download::filename_from_url;
use crate::error::{Result, ScrapeError};
use crate::extract::{element_text, extract_from_document, update_year};
use crate::models::{Candidate, ListingPage, PageMetadata};
use crate::pipeline::{CrawlContext, SiteScraper};
use crate::renderer::PageRenderer;

static PDF_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"a[href$=".pdf"]"#).expect("static selector"));

pub struct CdcEisScraper<R> {
    renderer: R,
}

impl<R: PageRenderer> CdcEisScraper<R> {
    pub fn new(renderer: R) -> Self {
        Self { renderer }
    }
}

/// Case-study candidates on the listing page, in document order.
///
/// The listing page's own meta tags are attached to every candidate; the PDFs
/// carry none.
pub fn parse_listing(html: &str, page_url: &str) -> Result<Vec<Candidate>> {
    let base = Url::parse(page_url).map_err(|e| ScrapeError::Url(format!("{page_url}: {e}")))?;
    let document = Html::parse_document(html);
    let meta: PageMetadata = extract_from_document(&document);

    let mut candidates = Vec::new();
    for link in document.select(&PDF_LINK) {
        let Some(href) = link.value().attr("href") else { continue };
        let url = match base.join(href) {
            Ok(url) => url.to_string(),
            Err(e) => {
                warn!(%href, error = %e, "Skipping unparsable link");
                continue;
            }
        };
        let filename = filename_from_url(&url);
        let mut candidate = Candidate::new(&url, &filename, "pdf");
        candidate.title = filename.strip_suffix(".pdf").map(str::to_string);
        candidate.publication_date = enclosing_paragraph(link).and_then(|p| update_year(&element_text(p)));
        candidate.meta = Some(meta.clone());
        candidates.push(candidate);
    }
    Ok(candidates)
}

fn enclosing_paragraph(link: ElementRef<'_>) -> Option<ElementRef<'_>> {
    link.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "p")
}

impl<R: PageRenderer> SiteScraper for CdcEisScraper<R> {
    fn name(&self) -> &'static str {
        "cdc-eis"
    }

    #[instrument(level = "info", skip_all)]
    async fn next_page(&mut self, ctx: &CrawlContext) -> Result<ListingPage> {
        let start_url = &ctx.config.start_url;
        if !self.renderer.open(start_url).await? {
            return Ok(ListingPage::last(Vec::new()));
        }
        let html = self.renderer.html().await?;
        let candidates = parse_listing(&html, start_url)?;
        info!(count = candidates.len(), "Indexed case study PDFs");
        Ok(ListingPage::last(candidates))
    }

    async fn finish(&mut self) -> Result<()> {
        self.renderer.close().await
    }
}
