//! robots.txt parsing and permission checks.
//!
//! A [`RobotsGate`] is built once per site run and shared (via `Arc`) by the
//! fetcher and the renderers. It understands `User-agent` groups, `Allow`,
//! `Disallow` (with `*` wildcards and a trailing `$` anchor), `Crawl-delay`
//! and `Sitemap` lines. Matching follows the usual longest-pattern-wins rule,
//! with `Allow` winning ties.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{Result, ScrapeError};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
}

/// Parsed robots.txt for one site.
#[derive(Debug, Clone, Default)]
pub struct RobotsGate {
    groups: Vec<Group>,
    sitemaps: Vec<String>,
}

impl RobotsGate {
    /// A gate that allows everything, used when a site has no robots.txt.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse the body of a robots.txt file.
    pub fn parse(body: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut sitemaps = Vec::new();
        let mut current: Option<Group> = None;
        let mut last_was_agent = false;

        for raw in body.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !last_was_agent {
                        if let Some(done) = current.take() {
                            groups.push(done);
                        }
                        current = Some(Group::default());
                    }
                    if let Some(group) = current.as_mut() {
                        group.agents.push(value.to_ascii_lowercase());
                    }
                    last_was_agent = true;
                }
                "allow" | "disallow" => {
                    last_was_agent = false;
                    let Some(group) = current.as_mut() else {
                        continue;
                    };
                    if value.is_empty() {
                        // `Disallow:` with no path allows everything.
                        continue;
                    }
                    group.rules.push(Rule {
                        allow: key == "allow",
                        pattern: normalize_pattern(value),
                    });
                }
                "crawl-delay" => {
                    last_was_agent = false;
                    if let Some(group) = current.as_mut() {
                        match value.parse::<f64>().map(Duration::try_from_secs_f64) {
                            Ok(Ok(delay)) => group.crawl_delay = Some(delay),
                            _ => debug!(value, "Ignoring unparsable Crawl-delay"),
                        }
                    }
                }
                "sitemap" => {
                    // Sitemap lines are global; keep the agent group open.
                    if !value.is_empty() {
                        sitemaps.push(value.to_string());
                    }
                }
                _ => {
                    last_was_agent = false;
                }
            }
        }
        if let Some(done) = current.take() {
            groups.push(done);
        }

        Self { groups, sitemaps }
    }

    /// Fetch and parse `robots_url` with a plain GET.
    ///
    /// The robots.txt request itself is not subject to politeness checks. A 4xx
    /// answer means "no robots.txt" and yields an allow-all gate; transport
    /// failures and 5xx answers abort the site run.
    #[instrument(level = "info", skip(client))]
    pub async fn fetch(client: &reqwest::Client, robots_url: &str) -> Result<Self> {
        let response = client
            .get(robots_url)
            .send()
            .await
            .map_err(|e| ScrapeError::RobotsFetch {
                url: robots_url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_client_error() {
            warn!(status = status.as_u16(), "No robots.txt available; allowing all paths");
            return Ok(Self::allow_all());
        }
        if !status.is_success() {
            return Err(ScrapeError::RobotsFetch {
                url: robots_url.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let body = response.text().await.map_err(|e| ScrapeError::RobotsFetch {
            url: robots_url.to_string(),
            reason: e.to_string(),
        })?;
        let gate = Self::parse(&body);
        info!(
            groups = gate.groups.len(),
            sitemaps = gate.sitemaps.len(),
            "Parsed robots.txt"
        );
        Ok(gate)
    }

    /// Whether `agent` may fetch `url`.
    ///
    /// Unparsable URLs are refused.
    pub fn can_fetch(&self, url: &str, agent: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }
        if path == "/robots.txt" {
            return true;
        }

        let mut best: Option<(usize, bool)> = None;
        for group in self.groups_for(agent) {
            for rule in &group.rules {
                if !pattern_matches(&rule.pattern, &path) {
                    continue;
                }
                let specificity = rule.pattern.len();
                best = match best {
                    Some((len, allow)) if len > specificity => Some((len, allow)),
                    Some((len, allow)) if len == specificity => Some((len, allow || rule.allow)),
                    _ => Some((specificity, rule.allow)),
                };
            }
        }
        best.is_none_or(|(_, allow)| allow)
    }

    /// The `Crawl-delay` that applies to `agent`, if any.
    pub fn crawl_delay(&self, agent: &str) -> Option<Duration> {
        self.groups_for(agent).find_map(|g| g.crawl_delay)
    }

    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// Groups addressed to the most specific agent token matching `agent`,
    /// falling back to the `*` groups.
    fn groups_for<'a>(&'a self, agent: &str) -> impl Iterator<Item = &'a Group> + 'a {
        let product = product_token(agent);
        let best_len = self
            .groups
            .iter()
            .flat_map(|g| g.agents.iter())
            .filter(|a| a.as_str() != "*" && !a.is_empty() && product.starts_with(a.as_str()))
            .map(|a| a.len())
            .max();

        self.groups.iter().filter(move |g| match best_len {
            Some(len) => g
                .agents
                .iter()
                .any(|a| a.len() == len && a.as_str() != "*" && product.starts_with(a.as_str())),
            None => g.agents.iter().any(|a| a == "*"),
        })
    }
}

/// Lowercased product token of a user-agent string (`Foo/1.0 (...)` -> `foo`).
fn product_token(agent: &str) -> String {
    agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn normalize_pattern(value: &str) -> String {
    if value.starts_with('/') || value.starts_with('*') {
        value.to_string()
    } else {
        format!("/{value}")
    }
}

/// Match a robots.txt path pattern (`*` wildcard, optional trailing `$`).
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    if !path.starts_with(first) {
        return false;
    }
    let mut pos = first.len();
    let rest: Vec<&str> = parts.collect();
    if rest.is_empty() {
        return !anchored || pos == path.len();
    }

    for (i, part) in rest.iter().enumerate() {
        let last = i + 1 == rest.len();
        if last && anchored {
            return path.len() >= pos + part.len() && path[pos..].ends_with(part);
        }
        match path[pos..].find(part) {
            Some(idx) => pos += idx + part.len(),
            None => return false,
        }
    }
    true
}
