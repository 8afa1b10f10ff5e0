//! Error taxonomy shared by every scraper component.
//!
//! A URL that robots.txt forbids is *not* an error: the fetcher returns
//! `Ok(None)` and the pipeline records a `Restricted` outcome. Everything in
//! [`ScrapeError`] is either fatal for one URL (the pipeline logs it and moves
//! on) or fatal for a whole site run (robots.txt fetch, ledger IO).

use thiserror::Error;

/// Errors raised while crawling a site.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("gave up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: usize,
        last: Box<ScrapeError>,
    },

    #[error("could not fetch robots.txt from {url}: {reason}")]
    RobotsFetch { url: String, reason: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid setting `{key}`: {reason}")]
    Config { key: String, reason: String },

    #[error("invalid url {0}")]
    Url(String),

    #[error("invalid selector `{0}`")]
    Selector(String),

    #[error("{renderer} renderer cannot perform {action}")]
    Unsupported {
        renderer: &'static str,
        action: String,
    },

    #[error("renderer error: {0}")]
    Renderer(String),

    #[error("expected element `{selector}` missing on {url}")]
    MissingElement { selector: String, url: String },
}

impl ScrapeError {
    pub fn http(url: &str, source: reqwest::Error) -> Self {
        Self::Http {
            url: url.to_string(),
            source,
        }
    }

    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Whether another attempt at the same request could plausibly succeed.
    ///
    /// Transport failures, 429 and 5xx are transient; other statuses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
