//! Command-line interface definitions for the public-health scrapers.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Most options can also come from `PUBHEALTH_*` environment variables.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{CliOverrides, SiteKind};
use crate::scrapers::RendererKind;

/// Command-line arguments for the corpus crawler.
///
/// # Examples
///
/// ```sh
/// # Crawl every site into the default corpus directory
/// pubhealth_scrapers
///
/// # Two sites, a custom corpus root, at most 10 new documents each
/// pubhealth_scrapers -s samhsa -s who-fact-sheets -b /data/corpus --download-limit 10
///
/// # Per-site overrides from YAML
/// pubhealth_scrapers -c scrapers.yaml -s cdc-stacks --renderer browser
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Site to crawl; repeat for several. Every site when omitted
    #[arg(short, long = "site", value_enum)]
    pub sites: Vec<SiteKind>,

    /// Corpus root holding `raw/` and `logs/`
    #[arg(short, long, env = "PUBHEALTH_BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// Optional path to a YAML file with per-site overrides
    #[arg(short, long, env = "PUBHEALTH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Rendering engine for listing pages
    #[arg(short, long, value_enum, default_value_t = RendererKind::Auto, env = "PUBHEALTH_RENDERER")]
    pub renderer: RendererKind,

    /// User agent sent with every request and matched against robots.txt
    #[arg(long, env = "PUBHEALTH_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Stop each site after this many new captures
    #[arg(long, env = "PUBHEALTH_DOWNLOAD_LIMIT")]
    pub download_limit: Option<usize>,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub headed: bool,
}

impl Cli {
    /// Sites in crawl order, without repeats.
    pub fn selected_sites(&self) -> Vec<SiteKind> {
        if self.sites.is_empty() {
            return SiteKind::ALL.to_vec();
        }
        let mut sites = Vec::new();
        for site in &self.sites {
            if !sites.contains(site) {
                sites.push(*site);
            }
        }
        sites
    }

    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            base_dir: self.base_dir.clone(),
            user_agent: self.user_agent.clone(),
            download_limit: self.download_limit,
        }
    }
}
