//! # Public-health scrapers
//!
//! Polite, incremental crawlers that collect public-health documents from CDC,
//! SAMHSA and WHO sites into a local corpus, with a metadata ledger per site.
//!
//! ## Features
//!
//! - Honors robots.txt (allow/disallow, wildcards, `Crawl-delay`) on every request
//! - Re-runs are incremental: URLs already in a site's ledger are skipped
//! - Static HTTP listings, or headless Chromium (`browser` feature) for
//!   listings that need form filling and script-driven paging
//! - Per-site defaults, overridable from YAML and the command line
//!
//! ## Usage
//!
//! ```sh
//! pubhealth_scrapers -s samhsa -b ./corpus
//! ```
//!
//! ## Architecture
//!
//! Each selected site runs to completion before the next starts:
//! 1. **Setup**: resolve the site config, fetch robots.txt, load the ledger
//! 2. **Listing**: the site's walker yields pages of candidates
//! 3. **Capture**: dedup, robots check, download, metadata, ledger row
//! 4. **Output**: rewrite the ledger CSV and a JSON run summary

use std::error::Error;

use clap::Parser;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod download;
mod error;
mod extract;
mod fetcher;
mod ledger;
mod models;
mod outputs;
mod pipeline;
mod renderer;
mod robots;
mod scrapers;
mod utils;

use cli::Cli;
use config::{FileConfig, resolve};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("pubhealth_scrapers starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let file_config = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let overrides = args.overrides();
    let sites = args
        .selected_sites()
        .into_iter()
        .map(|site| resolve(site, &file_config, &overrides).map(|config| (site, config)))
        .collect::<Result<Vec<_>, _>>()?;
    info!(count = sites.len(), "Sites selected");

    let mut failed_sites = Vec::new();
    for (site, site_config) in sites {
        match scrapers::run(site_config, args.renderer, !args.headed).await {
            Ok(summary) => info!(
                site = site.key(),
                captured = summary.captured,
                skipped = summary.skipped,
                restricted = summary.restricted,
                failed = summary.failed,
                ledger_rows = summary.ledger_rows,
                "Site finished"
            ),
            Err(e) => {
                error!(site = site.key(), error = %e, "Site run aborted");
                failed_sites.push(site.key());
            }
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    if !failed_sites.is_empty() {
        return Err(format!("site runs aborted: {}", failed_sites.join(", ")).into());
    }
    Ok(())
}
