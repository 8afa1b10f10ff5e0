//! Headless Chromium renderer for listings that need scripting.
//!
//! Drives a single tab through the DevTools protocol. Clicks go through
//! `find_element` so the element is scrolled into view first; dropdown,
//! fill and text-match actions run small scripts in the page. Robots and the
//! crawl delay are checked through the same [`PoliteFetcher`] the static
//! engine uses.

use std::time::{Duration, Instant};

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::{PageAction, PageRenderer};
use crate::error::{Result, ScrapeError};
use crate::fetcher::PoliteFetcher;

const WAIT_FOR_READY: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete') {
            resolve(true);
        } else {
            window.addEventListener('load', () => resolve(true));
            setTimeout(() => resolve(false), 15000);
        }
    })
"#;

fn cdp(e: impl std::fmt::Display) -> ScrapeError {
    ScrapeError::Renderer(e.to_string())
}

/// JS string literal for `value`.
fn js_str(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

pub struct BrowserRenderer {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Option<Page>,
    url: Option<String>,
    fetcher: PoliteFetcher,
    /// How long to look for an action's target element.
    find_timeout: Duration,
}

impl BrowserRenderer {
    /// Launch Chromium. `headless = false` opens a visible window.
    #[instrument(level = "info", skip(fetcher))]
    pub async fn launch(fetcher: PoliteFetcher, headless: bool) -> Result<Self> {
        let mut builder = BrowserConfig::builder();
        if !headless {
            builder = builder.with_head();
        }
        let config = builder
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .build()
            .map_err(cdp)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(cdp)?;
        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });
        info!("Browser launched");

        Ok(Self {
            browser,
            handler,
            page: None,
            url: None,
            fetcher,
            find_timeout: Duration::from_secs(10),
        })
    }

    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| ScrapeError::Renderer("no page is open".to_string()))
    }

    async fn eval_bool(&self, script: String) -> Result<bool> {
        let result = self.page()?.evaluate(script).await.map_err(cdp)?;
        result.into_value::<bool>().map_err(cdp)
    }

    /// Click the first match for `selector`, polling until `find_timeout`.
    async fn click(&self, selector: &str) -> Result<bool> {
        let page = self.page()?;
        let t0 = Instant::now();
        loop {
            match page.find_element(selector).await {
                Ok(element) => {
                    element.click().await.map_err(cdp)?;
                    return Ok(true);
                }
                Err(e) if t0.elapsed() >= self.find_timeout => {
                    debug!(%selector, error = %e, "Click target not found");
                    return Ok(false);
                }
                Err(_) => sleep(Duration::from_millis(500)).await,
            }
        }
    }

    async fn wait_ready(&self) {
        let Ok(page) = self.page() else { return };
        let ready = page.evaluate(WAIT_FOR_READY.to_string());
        match tokio::time::timeout(Duration::from_secs(20), ready).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!(error = %e, "Could not check ready state"),
            Err(_) => warn!("Timeout waiting for page ready state"),
        }
    }
}

impl PageRenderer for BrowserRenderer {
    fn name(&self) -> &'static str {
        "browser"
    }

    #[instrument(level = "info", skip_all, fields(%url))]
    async fn open(&mut self, url: &str) -> Result<bool> {
        let delay = self.fetcher.delay_for(self.fetcher.default_delay());
        if !delay.is_zero() {
            sleep(delay).await;
        }
        if !self.fetcher.can_fetch(url) {
            warn!(%url, "Restricted from scraping data from this URL");
            return Ok(false);
        }

        if let Some(page) = &self.page {
            page.goto(url).await.map_err(cdp)?;
        } else {
            self.page = Some(self.browser.new_page(url).await.map_err(cdp)?);
        }
        self.wait_ready().await;
        self.url = Some(url.to_string());
        info!("Loaded page");
        Ok(true)
    }

    async fn perform(&mut self, action: &PageAction) -> Result<bool> {
        debug!(?action, "Performing page action");
        let done = match action {
            PageAction::Wait(d) => {
                sleep(*d).await;
                true
            }
            PageAction::Click { selector } => self.click(selector).await?,
            PageAction::SelectOption {
                selector,
                visible_text,
            } => {
                let script = format!(
                    r#"(() => {{
                        const el = document.querySelector({sel});
                        if (!el) return false;
                        const opt = Array.from(el.options).find(o => o.text.trim() === {text});
                        if (!opt) return false;
                        el.value = opt.value;
                        el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                        return true;
                    }})()"#,
                    sel = js_str(selector),
                    text = js_str(visible_text),
                );
                self.eval_bool(script).await?
            }
            PageAction::Fill { selector, value } => {
                let script = format!(
                    r#"(() => {{
                        const el = document.querySelector({sel});
                        if (!el) return false;
                        el.value = {value};
                        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                        el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                        return true;
                    }})()"#,
                    sel = js_str(selector),
                    value = js_str(value),
                );
                self.eval_bool(script).await?
            }
            PageAction::ClickText { container, text } => {
                let script = format!(
                    r#"(() => {{
                        const root = document.querySelector({sel});
                        if (!root) return false;
                        const hit = Array.from(root.querySelectorAll('*'))
                            .find(e => e.children.length === 0 && e.textContent.trim() === {text});
                        if (!hit) return false;
                        hit.click();
                        return true;
                    }})()"#,
                    sel = js_str(container),
                    text = js_str(text),
                );
                self.eval_bool(script).await?
            }
        };
        if let Some(page) = &self.page {
            if let Ok(Some(url)) = page.url().await {
                self.url = Some(url);
            }
        }
        Ok(done)
    }

    async fn html(&mut self) -> Result<String> {
        self.page()?.content().await.map_err(cdp)
    }

    fn current_url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    async fn close(&mut self) -> Result<()> {
        self.page = None;
        self.url = None;
        self.browser.close().await.map_err(cdp)?;
        self.handler.abort();
        info!("Browser closed");
        Ok(())
    }
}
