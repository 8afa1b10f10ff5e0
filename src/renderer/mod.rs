//! Page rendering behind one small interface.
//!
//! Listing walkers never talk to HTTP or to a browser directly. They open a
//! page, perform a handful of [`PageAction`]s (click, pick from a dropdown,
//! fill a field), and read the resulting HTML back. Two engines implement
//! [`PageRenderer`]:
//!
//! | Engine              | Feature   | Can do                                        |
//! |---------------------|-----------|-----------------------------------------------|
//! | [`StaticRenderer`]  | always    | open, follow anchor clicks, wait, read HTML   |
//! | `BrowserRenderer`   | `browser` | everything, through headless Chromium         |
//!
//! The static engine answers form actions with [`ScrapeError::Unsupported`],
//! so sites whose listings need scripting fail loudly rather than silently
//! returning nothing. Both engines go through the robots gate before loading
//! a page.

use std::time::Duration;

use scraper::Html;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{Result, ScrapeError};
use crate::extract::selector;
use crate::fetcher::PoliteFetcher;

#[cfg(feature = "browser")]
pub mod browser;

#[cfg(feature = "browser")]
pub use browser::BrowserRenderer;

#[cfg(test)]
pub mod scripted;

/// One step of page interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    /// Click the first element matching `selector`.
    Click { selector: String },
    /// Pick the `<option>` whose visible text is `visible_text`.
    SelectOption {
        selector: String,
        visible_text: String,
    },
    /// Replace the value of an input field.
    Fill { selector: String, value: String },
    /// Click the element inside `container` whose text is exactly `text`.
    ClickText { container: String, text: String },
    /// Pause, letting scripts settle.
    Wait(Duration),
}

impl PageAction {
    pub fn click(selector: impl Into<String>) -> Self {
        PageAction::Click {
            selector: selector.into(),
        }
    }

    pub fn select(selector: impl Into<String>, visible_text: impl Into<String>) -> Self {
        PageAction::SelectOption {
            selector: selector.into(),
            visible_text: visible_text.into(),
        }
    }

    pub fn fill(selector: impl Into<String>, value: impl Into<String>) -> Self {
        PageAction::Fill {
            selector: selector.into(),
            value: value.into(),
        }
    }

    pub fn click_text(container: impl Into<String>, text: impl Into<String>) -> Self {
        PageAction::ClickText {
            container: container.into(),
            text: text.into(),
        }
    }

    fn label(&self) -> String {
        match self {
            PageAction::Click { selector } => format!("click `{selector}`"),
            PageAction::SelectOption { selector, .. } => format!("select option in `{selector}`"),
            PageAction::Fill { selector, .. } => format!("fill `{selector}`"),
            PageAction::ClickText { container, text } => {
                format!("click \"{text}\" in `{container}`")
            }
            PageAction::Wait(d) => format!("wait {d:?}"),
        }
    }
}

/// Open pages, interact with them and read their HTML.
pub trait PageRenderer {
    /// Short engine name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Load `url`. `Ok(false)` means robots.txt forbids it and nothing was loaded.
    async fn open(&mut self, url: &str) -> Result<bool>;

    /// Perform one action on the current page.
    ///
    /// `Ok(false)` means the target element is not on the page (the end of a
    /// pager, an option that does not exist).
    async fn perform(&mut self, action: &PageAction) -> Result<bool>;

    /// HTML of the current page.
    async fn html(&mut self) -> Result<String>;

    /// URL of the current page, if one is open.
    fn current_url(&self) -> Option<&str>;

    async fn close(&mut self) -> Result<()>;
}

/// Poll the current page until `ready` matches or the retries run out.
///
/// Returns the last HTML read either way; callers treat a missing element as
/// an empty result, not an error.
#[instrument(level = "debug", skip_all, fields(%ready))]
pub async fn wait_for<R: PageRenderer>(
    renderer: &mut R,
    ready: &str,
    retries: usize,
    delay: Duration,
) -> Result<String> {
    let ready_sel = selector(ready)?;
    let mut attempt = 0usize;
    loop {
        let html = renderer.html().await?;
        if Html::parse_document(&html).select(&ready_sel).next().is_some() {
            return Ok(html);
        }
        attempt += 1;
        if attempt > retries {
            warn!(attempts = attempt, "Element never appeared");
            return Ok(html);
        }
        debug!(attempt, ?delay, "Element not present yet");
        sleep(delay).await;
    }
}

/// Plain-HTTP renderer: every page is one polite GET.
#[derive(Debug, Clone)]
pub struct StaticRenderer {
    fetcher: PoliteFetcher,
    url: Option<String>,
    html: Option<String>,
}

impl StaticRenderer {
    pub fn new(fetcher: PoliteFetcher) -> Self {
        Self {
            fetcher,
            url: None,
            html: None,
        }
    }

    fn unsupported(&self, action: &PageAction) -> ScrapeError {
        ScrapeError::Unsupported {
            renderer: self.name(),
            action: action.label(),
        }
    }

    /// Absolute href of the first element matching `css`, if it is a link.
    fn href_of(&self, css: &str) -> Result<Option<Option<String>>> {
        let sel = selector(css)?;
        let html = self.html.as_deref().unwrap_or_default();
        let document = Html::parse_document(html);
        let Some(element) = document.select(&sel).next() else {
            return Ok(None);
        };
        let Some(href) = element.value().attr("href") else {
            return Ok(Some(None));
        };
        let base = self.url.as_deref().unwrap_or_default();
        let target = Url::parse(base)
            .and_then(|b| b.join(href))
            .map_err(|e| ScrapeError::Url(format!("{href}: {e}")))?;
        Ok(Some(Some(target.to_string())))
    }
}

impl PageRenderer for StaticRenderer {
    fn name(&self) -> &'static str {
        "static"
    }

    #[instrument(level = "info", skip_all, fields(%url))]
    async fn open(&mut self, url: &str) -> Result<bool> {
        let Some(body) = self.fetcher.fetch_text(url).await? else {
            return Ok(false);
        };
        info!(bytes = body.len(), "Loaded page");
        self.url = Some(url.to_string());
        self.html = Some(body);
        Ok(true)
    }

    async fn perform(&mut self, action: &PageAction) -> Result<bool> {
        match action {
            PageAction::Wait(d) => {
                sleep(*d).await;
                Ok(true)
            }
            PageAction::Click { selector } => match self.href_of(selector)? {
                None => Ok(false),
                Some(Some(target)) => self.open(&target).await,
                Some(None) => Err(self.unsupported(action)),
            },
            _ => Err(self.unsupported(action)),
        }
    }

    async fn html(&mut self) -> Result<String> {
        self.html
            .clone()
            .ok_or_else(|| ScrapeError::Renderer("no page is open".to_string()))
    }

    fn current_url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    async fn close(&mut self) -> Result<()> {
        self.url = None;
        self.html = None;
        Ok(())
    }
}

/// The renderer chosen at startup.
pub enum AnyRenderer {
    Static(StaticRenderer),
    #[cfg(feature = "browser")]
    Browser(BrowserRenderer),
}

impl PageRenderer for AnyRenderer {
    fn name(&self) -> &'static str {
        match self {
            AnyRenderer::Static(r) => r.name(),
            #[cfg(feature = "browser")]
            AnyRenderer::Browser(r) => r.name(),
        }
    }

    async fn open(&mut self, url: &str) -> Result<bool> {
        match self {
            AnyRenderer::Static(r) => r.open(url).await,
            #[cfg(feature = "browser")]
            AnyRenderer::Browser(r) => r.open(url).await,
        }
    }

    async fn perform(&mut self, action: &PageAction) -> Result<bool> {
        match self {
            AnyRenderer::Static(r) => r.perform(action).await,
            #[cfg(feature = "browser")]
            AnyRenderer::Browser(r) => r.perform(action).await,
        }
    }

    async fn html(&mut self) -> Result<String> {
        match self {
            AnyRenderer::Static(r) => r.html().await,
            #[cfg(feature = "browser")]
            AnyRenderer::Browser(r) => r.html().await,
        }
    }

    fn current_url(&self) -> Option<&str> {
        match self {
            AnyRenderer::Static(r) => r.current_url(),
            #[cfg(feature = "browser")]
            AnyRenderer::Browser(r) => r.current_url(),
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            AnyRenderer::Static(r) => r.close().await,
            #[cfg(feature = "browser")]
            AnyRenderer::Browser(r) => r.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SiteConfig, SiteKind};
    use crate::fetcher::build_client;
    use crate::robots::RobotsGate;
    use std::path::Path;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn renderer(robots: &str) -> StaticRenderer {
        let mut config = SiteConfig::defaults(SiteKind::Samhsa, Path::new("/tmp"));
        config.default_delay = Duration::ZERO;
        config.fetch_attempts = 1;
        let fetcher = PoliteFetcher::new(
            &config,
            build_client(&config.user_agent).unwrap(),
            Arc::new(RobotsGate::parse(robots)),
        );
        StaticRenderer::new(fetcher)
    }

    async fn site() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a id="next" href="/list2">Next</a><button id="go">Go</button>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/list2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>page two</p>"))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_static_click_follows_anchor() {
        let server = site().await;
        let mut r = renderer("");
        assert!(r.open(&format!("{}/list", server.uri())).await.unwrap());
        assert!(r.perform(&PageAction::click("#next")).await.unwrap());
        assert_eq!(r.current_url(), Some(format!("{}/list2", server.uri()).as_str()));
        assert!(r.html().await.unwrap().contains("page two"));
        // No pager on page two.
        assert!(!r.perform(&PageAction::click("#next")).await.unwrap());
    }

    #[tokio::test]
    async fn test_static_rejects_form_actions() {
        let server = site().await;
        let mut r = renderer("");
        r.open(&format!("{}/list", server.uri())).await.unwrap();

        let err = r.perform(&PageAction::click("#go")).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Unsupported { renderer: "static", .. }));
        let err = r
            .perform(&PageAction::select("#type", "Manual"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_static_open_respects_robots() {
        let server = site().await;
        let mut r = renderer("User-agent: *\nDisallow: /list\n");
        assert!(!r.open(&format!("{}/list", server.uri())).await.unwrap());
        assert!(r.html().await.is_err());
    }

    #[tokio::test]
    async fn test_wait_for_returns_last_html_when_absent() {
        let server = site().await;
        let mut r = renderer("");
        r.open(&format!("{}/list2", server.uri())).await.unwrap();
        let html = wait_for(&mut r, "div.results", 2, Duration::ZERO).await.unwrap();
        assert!(html.contains("page two"));
        let html = wait_for(&mut r, "p", 0, Duration::ZERO).await.unwrap();
        assert!(html.contains("page two"));
    }
}
