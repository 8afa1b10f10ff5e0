//! Site-run orchestration: walk listings, capture candidates, keep the ledger.
//!
//! # State per candidate
//!
//! ```text
//! candidate ──▶ in ledger? ── yes ─▶ Skipped
//!                   │ no
//!                   ▼
//!            robots allows? ── no ─▶ Restricted
//!                   │ yes
//!                   ▼
//!          resolve + download ── err ─▶ Failed (logged, run continues)
//!                   │ ok
//!                   ▼
//!          metadata + append ──▶ Captured
//! ```
//!
//! A run ends when the walker reports the last page, when the walker fails,
//! or when `download_limit` captures have been made. The ledger is written in
//! every case, followed by a JSON [`RunSummary`].

use scraper::Html;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SiteConfig;
use crate::download::Downloader;
use crate::error::{Result, ScrapeError};
use crate::extract::{DEFAULT_DESCRIPTION_FIELDS, combine_metadata_descriptions, extract_from_document, fetch_meta};
use crate::fetcher::PoliteFetcher;
use crate::ledger::Ledger;
use crate::models::{Author, Candidate, CaptureOutcome, ListingPage, MetadataRecord, PageMetadata, Payload, RunSummary};
use crate::outputs::json::write_summary;
use crate::utils::{non_blank, now_stamp, truncate_for_log};

/// Text pulled out of an HTML page that is itself the captured document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageText {
    pub text: String,
    pub publication_date: Option<String>,
}

/// Everything shared by a site's walker and the capture loop.
pub struct CrawlContext {
    pub config: SiteConfig,
    pub fetcher: PoliteFetcher,
    pub downloader: Downloader,
    pub ledger: Ledger,
}

/// A site's listing walker.
pub trait SiteScraper {
    fn name(&self) -> &'static str;

    /// Produce the next page of candidates.
    async fn next_page(&mut self, ctx: &CrawlContext) -> Result<ListingPage>;

    /// Fill in a candidate that needs a detail-page visit before download.
    /// `Ok(None)` means robots.txt forbids the detail page.
    async fn resolve(&mut self, _ctx: &CrawlContext, candidate: Candidate) -> Result<Option<Candidate>> {
        Ok(Some(candidate))
    }

    /// Extract the document text for [`Payload::PageText`] candidates.
    fn page_text(&self, _document: &Html) -> Result<PageText> {
        Err(ScrapeError::Unsupported {
            renderer: "pipeline",
            action: format!("page text for {}", self.name()),
        })
    }

    /// Release the walker's renderer.
    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Run one site to completion and persist its ledger and summary.
#[instrument(level = "info", skip_all, fields(site = scraper.name()))]
pub async fn run_site<S: SiteScraper>(scraper: &mut S, ctx: &mut CrawlContext) -> Result<RunSummary> {
    let mut summary = RunSummary {
        site: ctx.config.kind.key().to_string(),
        started_at: now_stamp(),
        ..RunSummary::default()
    };
    info!(ledger_rows = ctx.ledger.len(), limit = ?ctx.config.download_limit, "Starting site run");

    'pages: loop {
        let page = match scraper.next_page(ctx).await {
            Ok(page) => page,
            Err(e) => {
                error!(error = %e, "Listing walk failed; stopping this site");
                summary.stopped_by = Some(e.to_string());
                break;
            }
        };
        summary.pages += 1;
        info!(page = summary.pages, candidates = page.candidates.len(), has_next = page.has_next, "Listing page");

        for candidate in page.candidates {
            summary.candidates += 1;
            let outcome = capture(scraper, ctx, candidate).await;
            summary.record(&outcome);
            if limit_reached(&ctx.config, &summary) {
                info!(captured = summary.captured, "Download limit reached");
                summary.stopped_by = Some("download limit".to_string());
                break 'pages;
            }
        }

        if !page.has_next {
            info!("No more listing pages");
            break;
        }
    }

    if let Err(e) = scraper.finish().await {
        warn!(error = %e, "Could not shut down renderer cleanly");
    }

    ctx.ledger.save(&ctx.config.ledger_path())?;
    summary.ledger_rows = ctx.ledger.len();
    summary.finished_at = now_stamp();
    write_summary(&summary, &ctx.config.summary_path()).await?;

    info!(
        pages = summary.pages,
        captured = summary.captured,
        skipped = summary.skipped,
        restricted = summary.restricted,
        failed = summary.failed,
        "Site run complete"
    );
    Ok(summary)
}

fn limit_reached(config: &SiteConfig, summary: &RunSummary) -> bool {
    config
        .download_limit
        .is_some_and(|limit| summary.captured >= limit)
}

/// Take one candidate to a terminal outcome.
#[instrument(level = "info", skip_all, fields(url = %candidate.url))]
pub async fn capture<S: SiteScraper>(scraper: &mut S, ctx: &mut CrawlContext, candidate: Candidate) -> CaptureOutcome {
    if ctx.ledger.contains(&candidate.url) {
        debug!("Already captured; skipping");
        return CaptureOutcome::Skipped;
    }
    if !ctx.fetcher.can_fetch(&candidate.url) {
        warn!("Restricted from scraping data from this URL");
        return CaptureOutcome::Restricted;
    }

    match try_capture(scraper, ctx, candidate).await {
        Ok(Some(record)) => {
            info!(path = %record.storage_location, "Captured");
            ctx.ledger.append(record.clone());
            CaptureOutcome::Captured(Box::new(record))
        }
        Ok(None) => CaptureOutcome::Restricted,
        Err(e) => {
            let message = truncate_for_log(&e.to_string(), 500);
            error!(error = %message, "Capture failed");
            CaptureOutcome::Failed(message)
        }
    }
}

async fn try_capture<S: SiteScraper>(
    scraper: &mut S,
    ctx: &CrawlContext,
    candidate: Candidate,
) -> Result<Option<MetadataRecord>> {
    let Some(mut candidate) = scraper.resolve(ctx, candidate).await? else {
        return Ok(None);
    };

    let download_delay = ctx.config.download_delay;
    let path = match candidate.payload.clone() {
        Payload::Stream => {
            let Some(response) = ctx.fetcher.fetch_after(&candidate.url, download_delay).await? else {
                return Ok(None);
            };
            ctx.downloader.stream_to_file(response, &candidate.filename).await?
        }
        Payload::Whole { from } => {
            let source = from.as_deref().unwrap_or(&candidate.url);
            let Some(bytes) = ctx.fetcher.fetch_bytes(source, download_delay).await? else {
                return Ok(None);
            };
            ctx.downloader.write_bytes(&candidate.filename, &bytes).await?
        }
        Payload::PageText => {
            let Some(html) = ctx.fetcher.fetch_text(&candidate.url).await? else {
                return Ok(None);
            };
            let (page, meta) = {
                let document = Html::parse_document(&html);
                (scraper.page_text(&document)?, extract_from_document(&document))
            };
            if page.text.trim().is_empty() {
                return Err(ScrapeError::MissingElement {
                    selector: "page text".to_string(),
                    url: candidate.url.clone(),
                });
            }
            if candidate.publication_date.is_none() {
                candidate.publication_date = page.publication_date;
            }
            candidate.meta.get_or_insert(meta);
            ctx.downloader.write_text(&candidate.filename, &page.text).await?
        }
    };

    let meta = match (candidate.meta.take(), candidate.meta_page.as_deref()) {
        (Some(meta), _) => meta,
        (None, Some(page)) => match fetch_meta(&ctx.fetcher, page).await {
            Ok(meta) => meta.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, %page, "Metadata page unavailable; recording without it");
                PageMetadata::default()
            }
        },
        (None, None) => PageMetadata::default(),
    };

    Ok(Some(build_record(&ctx.config, candidate, meta, path.display().to_string())))
}

/// Assemble the ledger row for a captured candidate.
pub fn build_record(config: &SiteConfig, candidate: Candidate, meta: PageMetadata, storage_location: String) -> MetadataRecord {
    let stamp = now_stamp();
    let json_additional_metadata = combine_metadata_descriptions(&meta, &DEFAULT_DESCRIPTION_FIELDS);
    MetadataRecord {
        url: candidate.url,
        datetime_captured: stamp.clone(),
        title: non_blank(candidate.title).or(non_blank(meta.title)),
        author: non_blank(meta.author).map(Author::One),
        publication_date: non_blank(candidate.publication_date).or(non_blank(meta.date)),
        license: config.license.clone(),
        file_type: candidate.file_type,
        storage_location,
        datetime_last_updated: stamp,
        json_additional_metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteKind;
    use crate::fetcher::build_client;
    use crate::robots::RobotsGate;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Hands out pre-built pages, optionally failing after them.
    struct Scripted {
        pages: Vec<ListingPage>,
        fail_after: bool,
    }

    impl SiteScraper for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn next_page(&mut self, _ctx: &CrawlContext) -> Result<ListingPage> {
            if self.pages.is_empty() {
                if self.fail_after {
                    return Err(ScrapeError::Renderer("listing went away".into()));
                }
                return Ok(ListingPage::last(Vec::new()));
            }
            Ok(self.pages.remove(0))
        }

        fn page_text(&self, document: &Html) -> Result<PageText> {
            let sel = crate::extract::selector("div.body")?;
            Ok(PageText {
                text: crate::extract::text_of(document, &sel).unwrap_or_default(),
                publication_date: Some("2024-05-02".into()),
            })
        }
    }

    async fn context(dir: &TempDir, robots: &str) -> CrawlContext {
        let mut config = SiteConfig::defaults(SiteKind::CdcEis, dir.path());
        config.default_delay = Duration::ZERO;
        config.download_delay = Duration::ZERO;
        let fetcher = PoliteFetcher::new(
            &config,
            build_client(&config.user_agent).unwrap(),
            Arc::new(RobotsGate::parse(robots)),
        );
        let downloader = Downloader::new(config.raw_dir()).await.unwrap();
        let ledger = Ledger::load(&config.ledger_path()).unwrap();
        CrawlContext {
            config,
            fetcher,
            downloader,
            ledger,
        }
    }

    async fn pdf_server() -> MockServer {
        let server = MockServer::start().await;
        for name in ["/a.pdf", "/b.pdf", "/private/c.pdf"] {
            Mock::given(method("GET"))
                .and(path(name))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4".to_vec()))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/missing.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sheet"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><head><meta name="description" content="Key facts"></head>
                   <body><div class="body">Malaria is preventable.</div></body></html>"#,
            ))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_build_record_treats_blank_text_as_missing() {
        let config = SiteConfig::defaults(SiteKind::CdcEis, std::path::Path::new("/corpus"));
        let mut candidate = Candidate::new("https://x/a.pdf", "a.pdf", "pdf");
        candidate.title = Some("  ".into());
        candidate.publication_date = Some(String::new());
        let meta = PageMetadata {
            title: Some("Case study".into()),
            date: Some(String::new()),
            author: Some(String::new()),
            ..PageMetadata::default()
        };

        let record = build_record(&config, candidate, meta, "/corpus/raw/a.pdf".into());
        assert_eq!(record.title.as_deref(), Some("Case study"));
        assert_eq!(record.publication_date, None);
        assert_eq!(record.author, None);
    }

    fn pdf(server: &MockServer, name: &str) -> Candidate {
        let mut c = Candidate::new(format!("{}/{}", server.uri(), name), name.rsplit('/').next().unwrap(), "pdf");
        c.title = Some(name.to_string());
        c
    }

    #[tokio::test]
    async fn test_skips_ledger_rows_and_downloads_the_rest() {
        let dir = TempDir::new().unwrap();
        let server = pdf_server().await;
        let mut ctx = context(&dir, "").await;
        let known = pdf(&server, "a.pdf");
        ctx.ledger.append(build_record(&ctx.config, known.clone(), PageMetadata::default(), "old".into()));

        let mut scraper = Scripted {
            pages: vec![ListingPage::last(vec![known, pdf(&server, "b.pdf")])],
            fail_after: false,
        };
        let summary = run_site(&mut scraper, &mut ctx).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.captured, 1);
        assert_eq!(summary.ledger_rows, 2);
        assert!(dir.path().join("raw/cdc_eis_case_studies/b.pdf").is_file());
        assert!(!dir.path().join("raw/cdc_eis_case_studies/a.pdf").exists());

        let reloaded = Ledger::load(&ctx.config.ledger_path()).unwrap();
        let row = &reloaded.records()[1];
        assert_eq!(row.file_type, "pdf");
        assert_eq!(row.license, "Public Domain");
        assert!(row.storage_location.ends_with("b.pdf"));
        assert!(ctx.config.summary_path().is_file());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let server = pdf_server().await;

        let mut ctx = context(&dir, "").await;
        let mut scraper = Scripted {
            pages: vec![ListingPage::last(vec![pdf(&server, "a.pdf"), pdf(&server, "b.pdf")])],
            fail_after: false,
        };
        let first = run_site(&mut scraper, &mut ctx).await.unwrap();
        assert_eq!(first.captured, 2);

        let mut ctx = context(&dir, "").await;
        let mut scraper = Scripted {
            pages: vec![ListingPage::last(vec![pdf(&server, "a.pdf"), pdf(&server, "b.pdf")])],
            fail_after: false,
        };
        let second = run_site(&mut scraper, &mut ctx).await.unwrap();
        assert_eq!(second.captured, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.ledger_rows, 2);
    }

    #[tokio::test]
    async fn test_robots_blocked_candidate_is_not_downloaded() {
        let dir = TempDir::new().unwrap();
        let server = pdf_server().await;
        let mut ctx = context(&dir, "User-agent: *\nDisallow: /private/\n").await;
        let mut scraper = Scripted {
            pages: vec![ListingPage::last(vec![pdf(&server, "private/c.pdf")])],
            fail_after: false,
        };
        let summary = run_site(&mut scraper, &mut ctx).await.unwrap();
        assert_eq!(summary.restricted, 1);
        assert_eq!(summary.ledger_rows, 0);
        assert!(!dir.path().join("raw/cdc_eis_case_studies/c.pdf").exists());
    }

    #[tokio::test]
    async fn test_failed_download_does_not_stop_the_run() {
        let dir = TempDir::new().unwrap();
        let server = pdf_server().await;
        let mut ctx = context(&dir, "").await;
        let mut scraper = Scripted {
            pages: vec![ListingPage::last(vec![pdf(&server, "missing.pdf"), pdf(&server, "b.pdf")])],
            fail_after: false,
        };
        let summary = run_site(&mut scraper, &mut ctx).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.captured, 1);
        assert!(!ctx.ledger.contains(&format!("{}/missing.pdf", server.uri())));
    }

    #[tokio::test]
    async fn test_download_limit_and_walker_error() {
        let dir = TempDir::new().unwrap();
        let server = pdf_server().await;
        let mut ctx = context(&dir, "").await;
        ctx.config.download_limit = Some(1);
        let mut scraper = Scripted {
            pages: vec![ListingPage {
                candidates: vec![pdf(&server, "a.pdf"), pdf(&server, "b.pdf")],
                has_next: true,
            }],
            fail_after: true,
        };
        let summary = run_site(&mut scraper, &mut ctx).await.unwrap();
        assert_eq!(summary.captured, 1);
        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.stopped_by.as_deref(), Some("download limit"));

        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, "").await;
        let mut scraper = Scripted {
            pages: vec![ListingPage {
                candidates: vec![pdf(&server, "a.pdf")],
                has_next: true,
            }],
            fail_after: true,
        };
        let summary = run_site(&mut scraper, &mut ctx).await.unwrap();
        assert_eq!(summary.captured, 1);
        assert!(summary.stopped_by.unwrap().contains("listing went away"));
        // Ledger is still written when the walk fails.
        assert_eq!(Ledger::load(&ctx.config.ledger_path()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_page_text_capture_uses_page_meta() {
        let dir = TempDir::new().unwrap();
        let server = pdf_server().await;
        let mut ctx = context(&dir, "").await;
        let mut sheet = Candidate::new(format!("{}/sheet", server.uri()), "sheet.txt", "txt");
        sheet.payload = Payload::PageText;

        let mut scraper = Scripted {
            pages: vec![ListingPage::last(vec![sheet])],
            fail_after: false,
        };
        let summary = run_site(&mut scraper, &mut ctx).await.unwrap();
        assert_eq!(summary.captured, 1);

        let row = &ctx.ledger.records()[0];
        assert_eq!(row.publication_date.as_deref(), Some("2024-05-02"));
        assert_eq!(
            row.json_additional_metadata.get("description").and_then(|v| v.as_str()),
            Some("Key facts")
        );
        let text = std::fs::read_to_string(dir.path().join("raw/cdc_eis_case_studies/sheet.txt")).unwrap();
        assert_eq!(text, "Malaria is preventable.");
    }
}
