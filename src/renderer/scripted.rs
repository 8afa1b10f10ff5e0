//! Renderer that replays canned pages, for walker tests.
//!
//! `open` and every successful click move to the next screen. A click, text
//! click, select or fill succeeds only when its target is on the current
//! screen, so a pager control missing from the HTML ends paging the same way
//! it does in a browser.

use std::collections::VecDeque;

use scraper::Html;

use super::{PageAction, PageRenderer};
use crate::error::Result;
use crate::extract::selector;

pub struct ScriptedRenderer {
    screens: VecDeque<String>,
    current: String,
    url: Option<String>,
    /// Every call, in order: `open <url>`, action labels, `close`.
    pub log: Vec<String>,
}

impl ScriptedRenderer {
    pub fn new<I, S>(screens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            screens: screens.into_iter().map(Into::into).collect(),
            current: String::new(),
            url: None,
            log: Vec::new(),
        }
    }

    /// Screens not shown yet.
    pub fn remaining(&self) -> usize {
        self.screens.len()
    }

    fn has(&self, css: &str) -> Result<bool> {
        let sel = selector(css)?;
        Ok(Html::parse_document(&self.current).select(&sel).next().is_some())
    }

    fn advance(&mut self) {
        if let Some(next) = self.screens.pop_front() {
            self.current = next;
        }
    }
}

impl PageRenderer for ScriptedRenderer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn open(&mut self, url: &str) -> Result<bool> {
        self.log.push(format!("open {url}"));
        self.url = Some(url.to_string());
        self.advance();
        Ok(true)
    }

    async fn perform(&mut self, action: &PageAction) -> Result<bool> {
        self.log.push(action.label());
        let done = match action {
            PageAction::Wait(_) => true,
            PageAction::Click { selector } => {
                let found = self.has(selector)?;
                if found {
                    self.advance();
                }
                found
            }
            PageAction::ClickText { container, .. } => {
                let found = self.has(container)?;
                if found {
                    self.advance();
                }
                found
            }
            PageAction::SelectOption { selector, .. } | PageAction::Fill { selector, .. } => self.has(selector)?,
        };
        Ok(done)
    }

    async fn html(&mut self) -> Result<String> {
        Ok(self.current.clone())
    }

    fn current_url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    async fn close(&mut self) -> Result<()> {
        self.log.push("close".to_string());
        Ok(())
    }
}
