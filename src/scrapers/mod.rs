//! Listing walkers for each public-health site, and the runner that wires
//! a walker to the shared machinery.
//!
//! Every walker follows the same two-phase pattern:
//!
//! 1. **Listing**: produce pages of [`Candidate`](crate::models::Candidate)s
//!    through a [`PageRenderer`]
//! 2. **Capture**: hand them to [`pipeline::run_site`], which dedups, checks
//!    robots.txt, downloads and records
//!
//! # Supported Sites
//!
//! | Site | Module | Renderer | Notes |
//! |------|--------|----------|-------|
//! | CDC EIS case studies | [`cdc_eis`] | static | One page of PDF links |
//! | CDC Stacks | [`cdc_stacks`] | browser | Advanced-search form, 20 results per page |
//! | SAMHSA reports | [`samhsa`] | static | `?page=N` listing, files on report pages |
//! | WHO documents | [`who`] | browser | Kendo grid filtered by document type |
//! | WHO fact sheets | [`who`] | static | Page text saved as `.txt` |

pub mod cdc_eis;
pub mod cdc_stacks;
pub mod samhsa;
pub mod who;

use std::sync::Arc;

use clap::ValueEnum;
use tracing::{info, instrument, warn};

use crate::config::{SiteConfig, SiteKind};
use crate::download::Downloader;
use crate::error::Result;
use crate::fetcher::{PoliteFetcher, build_client};
use crate::ledger::Ledger;
use crate::models::RunSummary;
use crate::pipeline::{CrawlContext, run_site};
use crate::renderer::{AnyRenderer, StaticRenderer};
use crate::robots::RobotsGate;
use crate::utils::ensure_writable_dir;

use cdc_eis::CdcEisScraper;
use cdc_stacks::CdcStacksScraper;
use samhsa::SamhsaScraper;
use who::{WhoDocumentsScraper, WhoFactSheetsScraper};

/// Which rendering engine listings use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RendererKind {
    /// Browser for sites whose listings need scripting, static otherwise.
    #[default]
    Auto,
    Static,
    Browser,
}

impl RendererKind {
    fn wants_browser(self, kind: SiteKind) -> bool {
        match self {
            RendererKind::Auto => kind.needs_browser(),
            RendererKind::Static => false,
            RendererKind::Browser => true,
        }
    }
}

#[cfg(feature = "browser")]
async fn launch_browser(fetcher: PoliteFetcher, headless: bool) -> Result<AnyRenderer> {
    let browser = crate::renderer::BrowserRenderer::launch(fetcher, headless).await?;
    Ok(AnyRenderer::Browser(browser))
}

#[cfg(not(feature = "browser"))]
async fn launch_browser(_fetcher: PoliteFetcher, _headless: bool) -> Result<AnyRenderer> {
    Err(crate::error::ScrapeError::Renderer(
        "this build has no browser renderer; rebuild with `--features browser`".to_string(),
    ))
}

async fn make_renderer(
    choice: RendererKind,
    kind: SiteKind,
    fetcher: PoliteFetcher,
    headless: bool,
) -> Result<AnyRenderer> {
    if choice.wants_browser(kind) {
        if choice == RendererKind::Auto && !cfg!(feature = "browser") {
            warn!(site = kind.key(), "Listing needs a browser but none is built in; trying static pages");
            return Ok(AnyRenderer::Static(StaticRenderer::new(fetcher)));
        }
        return launch_browser(fetcher, headless).await;
    }
    Ok(AnyRenderer::Static(StaticRenderer::new(fetcher)))
}

/// Crawl one site end to end: robots.txt, ledger, listing walk, summary.
///
/// Fails only for problems that make the whole run meaningless (unwritable
/// corpus, unreachable robots.txt, unreadable ledger, no renderer). Per-URL
/// problems are counted in the returned [`RunSummary`].
#[instrument(level = "info", skip_all, fields(site = config.kind.key()))]
pub async fn run(config: SiteConfig, renderer: RendererKind, headless: bool) -> Result<RunSummary> {
    ensure_writable_dir(&config.base_dir).await?;

    let client = build_client(&config.user_agent)?;
    let robots = RobotsGate::fetch(&client, &config.robots_url).await?;
    info!(sitemaps = robots.sitemaps().len(), "Parsed robots.txt");
    let fetcher = PoliteFetcher::new(&config, client, Arc::new(robots));

    let downloader = Downloader::new(config.raw_dir()).await?;
    let ledger = Ledger::load(&config.ledger_path())?;
    let kind = config.kind;
    let renderer = make_renderer(renderer, kind, fetcher.clone(), headless).await?;

    let mut ctx = CrawlContext {
        fetcher,
        downloader,
        ledger,
        config,
    };

    match kind {
        SiteKind::CdcEis => run_site(&mut CdcEisScraper::new(renderer), &mut ctx).await,
        SiteKind::CdcStacks => {
            let searches = ctx.config.stacks_searches.clone();
            run_site(&mut CdcStacksScraper::new(renderer, searches), &mut ctx).await
        }
        SiteKind::Samhsa => run_site(&mut SamhsaScraper::new(renderer), &mut ctx).await,
        SiteKind::WhoDocuments => {
            let types = ctx.config.document_types.clone();
            run_site(&mut WhoDocumentsScraper::new(renderer, types), &mut ctx).await
        }
        SiteKind::WhoFactSheets => run_site(&mut WhoFactSheetsScraper::new(renderer), &mut ctx).await,
    }
}

/// Context with no delays and an allow-all robots gate.
#[cfg(test)]
pub(crate) async fn quiet_context(kind: SiteKind, dir: &std::path::Path, start_url: &str) -> CrawlContext {
    use std::time::Duration;

    let mut config = SiteConfig::defaults(kind, dir);
    config.start_url = start_url.to_string();
    config.default_delay = Duration::ZERO;
    config.download_delay = Duration::ZERO;
    config.retry_delay = Duration::ZERO;
    config.page_settle = Duration::ZERO;
    config.listing_retries = 0;
    config.listing_retry_delay = Duration::ZERO;
    let fetcher = PoliteFetcher::new(
        &config,
        build_client(&config.user_agent).unwrap(),
        Arc::new(RobotsGate::allow_all()),
    );
    CrawlContext {
        downloader: Downloader::new(config.raw_dir()).await.unwrap(),
        ledger: Ledger::new(),
        fetcher,
        config,
    }
}
