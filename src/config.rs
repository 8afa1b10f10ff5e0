//! Immutable per-site configuration.
//!
//! Built-in defaults describe the five crawls (CDC EIS case studies, CDC
//! Stacks, SAMHSA reports, WHO documents, WHO fact sheets). An optional YAML
//! file can override any of them, and a few CLI flags override the file. The
//! result is a [`SiteConfig`] per site that every component receives at
//! construction time and never mutates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{Result, ScrapeError};

/// Default polite delay between requests when robots.txt has no Crawl-delay.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Capture timestamp format used in the ledger.
pub const METADATA_DATE_FMT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub const DEFAULT_USER_AGENT: &str = concat!("pubhealth_scrapers/", env!("CARGO_PKG_VERSION"));

/// Corpus root under the user's home directory.
const CORPUS_DIR: &str = "gcs/pubhealth-ai-training-corpus";

/// The sites this crate knows how to crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SiteKind {
    CdcEis,
    CdcStacks,
    Samhsa,
    WhoDocuments,
    WhoFactSheets,
}

impl SiteKind {
    pub const ALL: [SiteKind; 5] = [
        SiteKind::CdcEis,
        SiteKind::CdcStacks,
        SiteKind::Samhsa,
        SiteKind::WhoDocuments,
        SiteKind::WhoFactSheets,
    ];

    /// Key used for this site in the YAML config file.
    pub fn key(self) -> &'static str {
        match self {
            SiteKind::CdcEis => "cdc-eis",
            SiteKind::CdcStacks => "cdc-stacks",
            SiteKind::Samhsa => "samhsa",
            SiteKind::WhoDocuments => "who-documents",
            SiteKind::WhoFactSheets => "who-fact-sheets",
        }
    }

    /// Whether the listing needs a scripted browser (form filling, JS paging).
    pub fn needs_browser(self) -> bool {
        matches!(self, SiteKind::CdcStacks | SiteKind::WhoDocuments)
    }
}

/// One CDC Stacks advanced-search filter set. Empty strings leave a field unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StacksSearch {
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub document_type: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub start_date: String,
}

/// Everything a site run needs to know, fixed for the run's lifetime.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub kind: SiteKind,
    pub start_url: String,
    pub robots_url: String,
    /// Folder name under `raw/` and part of the ledger filename.
    pub folder: String,
    pub ledger_prefix: String,
    pub license: String,
    pub base_dir: PathBuf,
    pub user_agent: String,
    pub default_delay: Duration,
    /// Delay used before file downloads (SAMHSA waits longer than for pages).
    pub download_delay: Duration,
    pub fetch_attempts: usize,
    pub retry_delay: Duration,
    pub download_limit: Option<usize>,
    /// WHO document-type filters, in crawl order.
    pub document_types: Vec<String>,
    /// CDC Stacks searches, in crawl order.
    pub stacks_searches: Vec<StacksSearch>,
    /// Pause after clicking a pagination control.
    pub page_settle: Duration,
    /// Bounded retries for transient listing faults.
    pub listing_retries: usize,
    pub listing_retry_delay: Duration,
}

impl SiteConfig {
    /// Built-in settings for `kind` rooted at `base_dir`.
    pub fn defaults(kind: SiteKind, base_dir: &Path) -> Self {
        let common = |start_url: &str, robots_url: &str, folder: &str, license: &str| SiteConfig {
            kind,
            start_url: start_url.to_string(),
            robots_url: robots_url.to_string(),
            folder: folder.to_string(),
            ledger_prefix: "log_".to_string(),
            license: license.to_string(),
            base_dir: base_dir.to_path_buf(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_delay: DEFAULT_WAIT,
            download_delay: DEFAULT_WAIT,
            fetch_attempts: 1,
            retry_delay: DEFAULT_WAIT,
            download_limit: None,
            document_types: Vec::new(),
            stacks_searches: Vec::new(),
            page_settle: Duration::from_secs(3),
            listing_retries: 3,
            listing_retry_delay: Duration::from_secs(1),
        };

        match kind {
            SiteKind::CdcEis => common(
                "https://www.cdc.gov/eis/request-services/casestudies.html",
                "https://www.cdc.gov/robots.txt",
                "cdc_eis_case_studies",
                "Public Domain",
            ),
            SiteKind::CdcStacks => SiteConfig {
                page_settle: DEFAULT_WAIT,
                stacks_searches: default_stacks_searches(),
                ..common(
                    "https://stacks.cdc.gov/advancesearch",
                    "https://stacks.cdc.gov/robots.txt",
                    "CDC_stacks",
                    "Public Domain",
                )
            },
            SiteKind::Samhsa => SiteConfig {
                download_delay: Duration::from_secs(10),
                fetch_attempts: 3,
                listing_retries: 5,
                listing_retry_delay: Duration::from_secs(8),
                ..common(
                    "https://www.samhsa.gov/data/all-reports",
                    "https://www.samhsa.gov/robots.txt",
                    "SAMHSA_reports",
                    "Public",
                )
            },
            SiteKind::WhoDocuments => SiteConfig {
                ledger_prefix: "logs_".to_string(),
                document_types: vec!["Manual".to_string(), "Position paper".to_string()],
                ..common(
                    "https://www.who.int/publications/m",
                    "https://www.who.int/robots.txt",
                    "WHO_documents",
                    "CC BY-NC-SA 3.0 IGO",
                )
            },
            SiteKind::WhoFactSheets => SiteConfig {
                ledger_prefix: "logs_".to_string(),
                ..common(
                    "https://www.who.int/news-room/fact-sheets",
                    "https://www.who.int/robots.txt",
                    "WHO_fact_sheets",
                    "CC BY-NC-SA 3.0 IGO",
                )
            },
        }
    }

    /// `<base>/raw/<folder>`
    pub fn raw_dir(&self) -> PathBuf {
        self.base_dir.join("raw").join(&self.folder)
    }

    /// `<base>/logs`
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// `<base>/logs/<prefix><folder>.csv`
    pub fn ledger_path(&self) -> PathBuf {
        self.logs_dir()
            .join(format!("{}{}.csv", self.ledger_prefix, self.folder))
    }

    /// `<base>/logs/run_<folder>.json`
    pub fn summary_path(&self) -> PathBuf {
        self.logs_dir().join(format!("run_{}.json", self.folder))
    }

    fn apply(&mut self, o: &SiteOverride) -> Result<()> {
        if let Some(v) = &o.start_url {
            self.start_url = v.clone();
        }
        if let Some(v) = &o.robots_url {
            self.robots_url = v.clone();
        }
        if let Some(v) = &o.folder {
            self.folder = v.clone();
        }
        if let Some(v) = &o.ledger_prefix {
            self.ledger_prefix = v.clone();
        }
        if let Some(v) = &o.license {
            self.license = v.clone();
        }
        if let Some(v) = o.default_delay_secs {
            self.default_delay = seconds("default_delay_secs", v)?;
        }
        if let Some(v) = o.download_delay_secs {
            self.download_delay = seconds("download_delay_secs", v)?;
        }
        if let Some(v) = o.fetch_attempts {
            self.fetch_attempts = v.max(1);
        }
        if let Some(v) = o.retry_delay_secs {
            self.retry_delay = seconds("retry_delay_secs", v)?;
        }
        if o.download_limit.is_some() {
            self.download_limit = o.download_limit;
        }
        if let Some(v) = &o.document_types {
            self.document_types = v.clone();
        }
        if let Some(v) = &o.stacks_searches {
            self.stacks_searches = v.clone();
        }
        if let Some(v) = o.page_settle_secs {
            self.page_settle = seconds("page_settle_secs", v)?;
        }
        Ok(())
    }
}

/// A non-negative, finite number of seconds from the config file.
fn seconds(key: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| ScrapeError::Config {
        key: key.to_string(),
        reason: format!("{value} seconds: {e}"),
    })
}

/// The four filter sets the CDC Stacks crawl has always used.
fn default_stacks_searches() -> Vec<StacksSearch> {
    let search = |collection: &str, document_type: &str, start_date: &str| StacksSearch {
        collection: collection.to_string(),
        document_type: document_type.to_string(),
        language: "English".to_string(),
        start_date: start_date.to_string(),
    };
    vec![
        search("Guidelines and Recommendations", "", "01/01/2018"),
        search("Stephen B. Thacker CDC Library collection", "Report", "01/01/2018"),
        search("Preventing Chronic Disease", "", "01/01/2018"),
        search("Historical CDC.gov Content", "Report", ""),
    ]
}

/// Per-site overrides read from YAML. Every field is optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteOverride {
    pub start_url: Option<String>,
    pub robots_url: Option<String>,
    pub folder: Option<String>,
    pub ledger_prefix: Option<String>,
    pub license: Option<String>,
    pub default_delay_secs: Option<f64>,
    pub download_delay_secs: Option<f64>,
    pub fetch_attempts: Option<usize>,
    pub retry_delay_secs: Option<f64>,
    pub download_limit: Option<usize>,
    pub document_types: Option<Vec<String>>,
    pub stacks_searches: Option<Vec<StacksSearch>>,
    pub page_settle_secs: Option<f64>,
}

/// Top-level YAML config file.
///
/// ```yaml
/// base_dir: /data/corpus
/// user_agent: "pubhealth-bot/1.0 (+mailto:ops@example.org)"
/// sites:
///   samhsa:
///     fetch_attempts: 5
///   who-documents:
///     document_types: ["Manual"]
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub base_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub sites: HashMap<String, SiteOverride>,
}

impl FileConfig {
    #[instrument(level = "info")]
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ScrapeError::io(path, e))?;
        let parsed = Self::from_yaml(&text)?;
        info!(sites = parsed.sites.len(), "Loaded configuration file");
        Ok(parsed)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Values that come from the command line and beat the config file.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub base_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub download_limit: Option<usize>,
}

/// `$HOME/gcs/pubhealth-ai-training-corpus`, or a relative path if `HOME` is unset.
pub fn default_base_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CORPUS_DIR)
}

/// Resolve the final [`SiteConfig`] for `kind`: defaults, then file, then CLI.
pub fn resolve(kind: SiteKind, file: &FileConfig, cli: &CliOverrides) -> Result<SiteConfig> {
    let base_dir = cli
        .base_dir
        .clone()
        .or_else(|| file.base_dir.clone())
        .unwrap_or_else(default_base_dir);

    let mut config = SiteConfig::defaults(kind, &base_dir);
    if let Some(ua) = cli.user_agent.as_ref().or(file.user_agent.as_ref()) {
        config.user_agent = ua.clone();
    }
    if let Some(o) = file.sites.get(kind.key()) {
        config.apply(o)?;
    }
    if cli.download_limit.is_some() {
        config.download_limit = cli.download_limit;
    }
    debug!(site = kind.key(), ?config, "Resolved site configuration");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = SiteConfig::defaults(SiteKind::CdcEis, Path::new("/corpus"));
        assert_eq!(config.raw_dir(), PathBuf::from("/corpus/raw/cdc_eis_case_studies"));
        assert_eq!(
            config.ledger_path(),
            PathBuf::from("/corpus/logs/log_cdc_eis_case_studies.csv")
        );
        assert_eq!(
            config.summary_path(),
            PathBuf::from("/corpus/logs/run_cdc_eis_case_studies.json")
        );
    }

    #[test]
    fn test_site_specific_defaults() {
        let samhsa = SiteConfig::defaults(SiteKind::Samhsa, Path::new("/c"));
        assert_eq!(samhsa.fetch_attempts, 3);
        assert_eq!(samhsa.download_delay, Duration::from_secs(10));
        assert_eq!(samhsa.license, "Public");

        let who = SiteConfig::defaults(SiteKind::WhoDocuments, Path::new("/c"));
        assert_eq!(who.ledger_prefix, "logs_");
        assert_eq!(who.document_types, vec!["Manual", "Position paper"]);

        let stacks = SiteConfig::defaults(SiteKind::CdcStacks, Path::new("/c"));
        assert_eq!(stacks.stacks_searches.len(), 4);
        assert_eq!(stacks.stacks_searches[3].start_date, "");
    }

    #[test]
    fn test_yaml_overrides_then_cli() {
        let file = FileConfig::from_yaml(
            r#"
base_dir: /from/file
user_agent: file-agent
sites:
  samhsa:
    fetch_attempts: 0
    download_limit: 7
    default_delay_secs: 0.25
"#,
        )
        .unwrap();

        let cli = CliOverrides {
            base_dir: Some(PathBuf::from("/from/cli")),
            user_agent: None,
            download_limit: None,
        };
        let config = resolve(SiteKind::Samhsa, &file, &cli).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/from/cli"));
        assert_eq!(config.user_agent, "file-agent");
        assert_eq!(config.fetch_attempts, 1);
        assert_eq!(config.download_limit, Some(7));
        assert_eq!(config.default_delay, Duration::from_millis(250));

        let cli = CliOverrides {
            download_limit: Some(2),
            ..CliOverrides::default()
        };
        let config = resolve(SiteKind::Samhsa, &file, &cli).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/from/file"));
        assert_eq!(config.download_limit, Some(2));
    }

    #[test]
    fn test_out_of_range_delays_are_config_errors() {
        for (key, value) in [
            ("default_delay_secs", "-1"),
            ("download_delay_secs", ".nan"),
            ("retry_delay_secs", "1.0e30"),
            ("page_settle_secs", ".inf"),
        ] {
            let yaml = format!("sites:\n  who-documents:\n    {key}: {value}\n");
            let file = FileConfig::from_yaml(&yaml).unwrap();
            let err = resolve(SiteKind::WhoDocuments, &file, &CliOverrides::default()).unwrap_err();
            assert!(
                matches!(&err, ScrapeError::Config { key: k, .. } if k == key),
                "{key}: {err}"
            );
        }

        // Other sites are unaffected by a bad override elsewhere.
        let file = FileConfig::from_yaml("sites:\n  samhsa:\n    default_delay_secs: -1\n").unwrap();
        assert!(resolve(SiteKind::CdcEis, &file, &CliOverrides::default()).is_ok());
    }

    #[test]
    fn test_unknown_yaml_keys_rejected() {
        assert!(FileConfig::from_yaml("bogus: 1\n").is_err());
    }

    #[test]
    fn test_browser_sites() {
        assert!(SiteKind::CdcStacks.needs_browser());
        assert!(SiteKind::WhoDocuments.needs_browser());
        assert!(!SiteKind::Samhsa.needs_browser());
    }
}
