//! Rate-limited, robots-aware HTTP fetching.
//!
//! Every request made on behalf of a site goes through [`PoliteFetcher`]:
//!
//! 1. wait the robots.txt `Crawl-delay` (or the site's default delay),
//! 2. refuse quietly if robots.txt disallows the URL (`Ok(None)`),
//! 3. GET the URL and turn non-2xx answers into [`ScrapeError::Status`],
//! 4. retry transient failures a bounded number of times.
//!
//! Requests are awaited one after another; the fetcher never runs two at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::{Rng, rng};
use reqwest::Response;
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

use crate::config::SiteConfig;
use crate::error::{Result, ScrapeError};
use crate::robots::RobotsGate;

/// Build the shared HTTP client for a site run.
pub fn build_client(user_agent: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(300))
        .build()
        .map_err(|e| ScrapeError::http("<client>", e))
}

/// HTTP GET wrapper that honours robots.txt and crawl delays.
///
/// Cheap to clone: the client and the robots gate are shared.
#[derive(Debug, Clone)]
pub struct PoliteFetcher {
    client: reqwest::Client,
    robots: Arc<RobotsGate>,
    agent: String,
    default_delay: Duration,
    attempts: usize,
    retry_delay: Duration,
}

impl PoliteFetcher {
    pub fn new(config: &SiteConfig, client: reqwest::Client, robots: Arc<RobotsGate>) -> Self {
        Self {
            client,
            robots,
            agent: config.user_agent.clone(),
            default_delay: config.default_delay,
            attempts: config.fetch_attempts.max(1),
            retry_delay: config.retry_delay,
        }
    }

    #[cfg(feature = "browser")]
    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    /// Delay before the next request: robots.txt wins over `fallback`.
    pub fn delay_for(&self, fallback: Duration) -> Duration {
        self.robots.crawl_delay(&self.agent).unwrap_or(fallback)
    }

    pub fn can_fetch(&self, url: &str) -> bool {
        self.robots.can_fetch(url, &self.agent)
    }

    /// Fetch `url` after the default delay.
    pub async fn fetch(&self, url: &str) -> Result<Option<Response>> {
        self.fetch_after(url, self.default_delay).await
    }

    /// Fetch `url` after `fallback` (or the robots.txt crawl delay, if set).
    ///
    /// `Ok(None)` means robots.txt forbids the URL.
    #[instrument(level = "debug", skip_all, fields(%url))]
    pub async fn fetch_after(&self, url: &str, fallback: Duration) -> Result<Option<Response>> {
        let delay = self.delay_for(fallback);
        if !delay.is_zero() {
            debug!(?delay, "Waiting before request");
            sleep(delay).await;
        }

        if !self.can_fetch(url) {
            warn!(%url, "Restricted from scraping data from this URL");
            return Ok(None);
        }

        self.get_with_retry(url).await.map(Some)
    }

    /// Fetch `url` and read the body as text.
    pub async fn fetch_text(&self, url: &str) -> Result<Option<String>> {
        match self.fetch(url).await? {
            Some(response) => {
                let body = response.text().await.map_err(|e| ScrapeError::http(url, e))?;
                Ok(Some(body))
            }
            None => Ok(None),
        }
    }

    /// Fetch `url` after `fallback` and read the whole body.
    pub async fn fetch_bytes(&self, url: &str, fallback: Duration) -> Result<Option<Vec<u8>>> {
        match self.fetch_after(url, fallback).await? {
            Some(response) => {
                let body = response.bytes().await.map_err(|e| ScrapeError::http(url, e))?;
                Ok(Some(body.to_vec()))
            }
            None => Ok(None),
        }
    }

    async fn get_with_retry(&self, url: &str) -> Result<Response> {
        let t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            match self.get_once(url).await {
                Ok(response) => return Ok(response),
                Err(e) if self.attempts == 1 || !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.attempts => {
                    error!(
                        attempt,
                        max = self.attempts,
                        elapsed_ms_total = t0.elapsed().as_millis(),
                        error = %e,
                        "GET exhausted retries"
                    );
                    return Err(ScrapeError::RetriesExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = self.retry_delay + Duration::from_millis(jitter_ms);
                    warn!(
                        attempt,
                        max = self.attempts,
                        ?delay,
                        error = %e,
                        "GET failed; retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn get_once(&self, url: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::http(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SiteConfig, SiteKind};
    use std::path::Path;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(robots: &str, attempts: usize) -> PoliteFetcher {
        let mut config = SiteConfig::defaults(SiteKind::CdcEis, Path::new("/tmp"));
        config.default_delay = Duration::ZERO;
        config.retry_delay = Duration::ZERO;
        config.fetch_attempts = attempts;
        PoliteFetcher::new(
            &config,
            build_client(&config.user_agent).unwrap(),
            Arc::new(RobotsGate::parse(robots)),
        )
    }

    #[tokio::test]
    async fn test_fetch_text_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hi</html>"))
            .mount(&server)
            .await;

        let f = fetcher("", 1);
        let body = f.fetch_text(&format!("{}/page.html", server.uri())).await.unwrap();
        assert_eq!(body.as_deref(), Some("<html>hi</html>"));
    }

    #[tokio::test]
    async fn test_restricted_url_is_not_requested() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let f = fetcher("User-agent: *\nDisallow: /secret/\n", 1);
        let res = f.fetch(&format!("{}/secret/a.pdf", server.uri())).await.unwrap();
        assert!(res.is_none());
    }

    #[tokio::test]
    async fn test_http_error_is_fatal_without_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let f = fetcher("", 1);
        let err = f.fetch(&format!("{}/x", server.uri())).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_bounded_retry_on_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let f = fetcher("", 3);
        let err = f.fetch(&format!("{}/report", server.uri())).await.unwrap_err();
        match err {
            ScrapeError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ScrapeError::Status { status: 503, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let f = fetcher("", 3);
        let err = f.fetch(&format!("{}/gone", server.uri())).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Status { status: 404, .. }), "{err}");
    }

    #[test]
    fn test_crawl_delay_overrides_default() {
        let f = fetcher("User-agent: *\nCrawl-delay: 7\n", 1);
        assert_eq!(f.delay_for(Duration::from_secs(5)), Duration::from_secs(7));
        let f = fetcher("", 1);
        assert_eq!(f.delay_for(Duration::from_secs(5)), Duration::from_secs(5));
    }
}
