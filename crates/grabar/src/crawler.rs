//! Site crawler.
//!
//! Breadth-first discovery of a target site, bounded three ways: maximum
//! depth, maximum page count, and a total wall-clock deadline. Every visited
//! page yields its interactive elements with synthesized locators; the
//! result is persisted as `crawlSummary.json` and later consumed by the
//! navigation resolver and the replay engine.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::{AuthConfig, Authenticator};
use crate::driver::{BrowserEngine, ContextConfig, PageHandle};
use crate::locator::{ElementKind, Locator, PageElement, Query};
use crate::result::{GrabarError, GrabarResult};
use crate::storage::{Storage, CRAWL_SUMMARY_FILE};

/// Crawl bounds and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Link depth from the start page (start page is depth 0)
    pub max_depth: u32,
    /// Total pages visited across the crawl
    pub max_pages: usize,
    /// Wall-clock deadline for the whole crawl, in milliseconds
    pub max_crawl_time_ms: u64,
    /// Per-page navigation and extraction deadline, in milliseconds
    pub page_timeout_ms: u64,
    /// New links enqueued from any single page
    pub max_links_per_page: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 30,
            max_crawl_time_ms: 120_000,
            page_timeout_ms: 15_000,
            max_links_per_page: 8,
        }
    }
}

impl CrawlConfig {
    fn crawl_deadline(&self) -> Duration {
        Duration::from_millis(self.max_crawl_time_ms)
    }

    fn page_deadline(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }
}

/// One crawled page and everything extracted from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledPage {
    /// Canonical URL after redirects
    pub url: String,
    /// URL path component
    pub path: String,
    /// Document title
    pub title: String,
    /// BFS depth from the start page
    pub depth: u32,
    /// When this page was visited
    pub crawled_at: DateTime<Utc>,
    /// Extracted elements in document order, grouped by kind
    pub elements: Vec<PageElement>,
}

impl CrawledPage {
    /// Text of every element replay could click on this page.
    #[must_use]
    pub fn clickable_texts(&self) -> Vec<&str> {
        self.elements
            .iter()
            .filter(|e| e.kind.is_clickable())
            .filter_map(|e| e.text.as_deref())
            .collect()
    }
}

/// The crawl artifact: site map plus per-page elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlMap {
    /// Canonical start URL
    pub base_url: String,
    /// Scheme and authority every crawled page shares
    pub origin: String,
    /// When the crawl ran
    pub crawled_at: DateTime<Utc>,
    /// Pages in visit order
    pub pages: Vec<CrawledPage>,
    /// Number of pages visited
    pub total_pages: usize,
    /// Depth bound the crawl was configured with
    pub max_depth: u32,
    /// Wall-clock time the crawl took, in milliseconds
    pub crawl_duration_ms: u64,
}

impl CrawlMap {
    /// Page whose canonical URL matches `url`.
    #[must_use]
    pub fn page_for(&self, url: &str) -> Option<&CrawledPage> {
        let canonical = canonicalize_url(url).ok()?;
        self.pages.iter().find(|p| p.url == canonical)
    }

    /// Page whose path equals `path`.
    #[must_use]
    pub fn page_for_path(&self, path: &str) -> Option<&CrawledPage> {
        let wanted = path.trim_end_matches('/');
        self.pages.iter().find(|p| {
            let have = p.path.trim_end_matches('/');
            have == wanted || (have.is_empty() && wanted.is_empty())
        })
    }

    /// All crawled paths, in visit order.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.pages.iter().map(|p| p.path.clone()).collect()
    }

    /// Persist as `crawlSummary.json` at the job root.
    pub async fn save(&self, storage: &dyn Storage) -> GrabarResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        storage.write_file(CRAWL_SUMMARY_FILE, &json).await
    }

    /// Load a previously saved map, or `None` when the job has none.
    pub async fn load(storage: &dyn Storage) -> GrabarResult<Option<Self>> {
        if !storage.exists(CRAWL_SUMMARY_FILE).await {
            return Ok(None);
        }
        let bytes = storage.read_file(CRAWL_SUMMARY_FILE).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// Canonical form of a URL: fragment stripped, query kept, trailing slash
/// trimmed everywhere but the root path.
pub fn canonicalize_url(url: &str) -> GrabarResult<String> {
    let mut parsed = Url::parse(url).map_err(|e| GrabarError::NavigationError {
        url: url.to_string(),
        message: format!("unparseable url: {e}"),
    })?;
    parsed.set_fragment(None);
    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }
    Ok(parsed.to_string())
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// Extraction order is fixed so crawl output is stable across runs.
const EXTRACTION_QUERIES: &[(&str, ElementKind)] = &[
    ("h1, h2, h3", ElementKind::Heading),
    ("nav a", ElementKind::Nav),
    ("button", ElementKind::Button),
    ("a", ElementKind::Link),
    ("form", ElementKind::Form),
    ("input, textarea, select", ElementKind::Input),
];

/// The crawl engine. Stateless apart from its configuration; the browser,
/// storage, and authenticator are passed per job.
#[derive(Debug, Clone, Default)]
pub struct CrawlEngine {
    config: CrawlConfig,
}

impl CrawlEngine {
    /// Engine with explicit bounds.
    #[must_use]
    pub fn new(config: CrawlConfig) -> Self {
        Self { config }
    }

    /// Crawl `start_url`, persist the summary, and return the map.
    pub async fn crawl(
        &self,
        browser: &dyn BrowserEngine,
        storage: &dyn Storage,
        authenticator: &dyn Authenticator,
        auth: Option<&AuthConfig>,
        start_url: &str,
    ) -> GrabarResult<CrawlMap> {
        let start_canonical = canonicalize_url(start_url)?;
        let origin_url = Url::parse(&start_canonical).map_err(|e| GrabarError::NavigationError {
            url: start_canonical.clone(),
            message: e.to_string(),
        })?;

        let context = browser.new_context(ContextConfig::headless()).await?;
        let page = context.new_page().await?;
        if let Some(auth) = auth {
            authenticator
                .authenticate(page.as_ref(), &start_canonical, auth)
                .await?;
        }

        let started = Instant::now();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        visited.insert(start_canonical.clone());
        queue.push_back((start_canonical.clone(), 0));

        let mut pages = Vec::new();
        while let Some((url, depth)) = queue.pop_front() {
            if pages.len() >= self.config.max_pages {
                tracing::info!(max_pages = self.config.max_pages, "page budget reached");
                break;
            }
            if started.elapsed() >= self.config.crawl_deadline() {
                tracing::warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "crawl deadline reached"
                );
                break;
            }

            let visit = tokio::time::timeout(
                self.config.page_deadline(),
                self.visit_page(page.as_ref(), &url, depth, &origin_url),
            )
            .await
            .map_err(|_| GrabarError::Timeout {
                ms: self.config.page_timeout_ms,
            })
            .and_then(|inner| inner);

            let (crawled, links) = match visit {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "skipping unreachable page");
                    continue;
                }
            };

            // A redirect may land on a page already visited under its own URL.
            if crawled.url != url && !visited.insert(crawled.url.clone()) {
                tracing::debug!(from = %url, to = %crawled.url, "redirect into visited page");
                continue;
            }

            tracing::info!(
                url = %crawled.url,
                depth,
                elements = crawled.elements.len(),
                "crawled page"
            );

            if depth < self.config.max_depth {
                let mut enqueued = 0;
                for link in links {
                    if enqueued >= self.config.max_links_per_page {
                        break;
                    }
                    if visited.insert(link.clone()) {
                        queue.push_back((link, depth + 1));
                        enqueued += 1;
                    }
                }
            }
            pages.push(crawled);
        }

        context.close().await?;

        let map = CrawlMap {
            base_url: start_canonical,
            origin: origin_url.origin().ascii_serialization(),
            crawled_at: Utc::now(),
            total_pages: pages.len(),
            max_depth: self.config.max_depth,
            crawl_duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            pages,
        };
        map.save(storage).await?;
        tracing::info!(pages = map.pages.len(), "crawl complete");
        Ok(map)
    }

    async fn visit_page(
        &self,
        page: &dyn PageHandle,
        url: &str,
        depth: u32,
        origin: &Url,
    ) -> GrabarResult<(CrawledPage, Vec<String>)> {
        let deadline = self.config.page_deadline();
        page.goto(url, deadline).await?;
        let landed = canonicalize_url(&page.current_url().await?)?;
        let title = page.title().await?;
        let base = Url::parse(&landed).map_err(|e| GrabarError::NavigationError {
            url: landed.clone(),
            message: e.to_string(),
        })?;

        let mut elements = Vec::new();
        let mut seen_anchors: HashSet<(String, String)> = HashSet::new();
        let mut links = Vec::new();
        for (selector, kind) in EXTRACTION_QUERIES {
            let query = Query::Css((*selector).to_string());
            let handles = page.query_all(&query, deadline).await?;
            for handle in handles {
                let text = handle.text.as_deref().or(handle.aria_label.as_deref());
                let absolute = handle
                    .href
                    .as_deref()
                    .and_then(|href| base.join(href).ok())
                    .and_then(|joined| canonicalize_url(joined.as_str()).ok());

                // The nav pass already claimed its anchors; the plain-link
                // pass must not emit them again.
                if matches!(kind, ElementKind::Nav | ElementKind::Link) {
                    let key = (
                        text.unwrap_or_default().to_string(),
                        absolute.clone().unwrap_or_default(),
                    );
                    if !seen_anchors.insert(key) {
                        continue;
                    }
                }

                let Some(locator) = Locator::for_element(*kind, text, handle.id.as_deref())
                else {
                    continue;
                };

                if let Some(target) = &absolute {
                    if let Ok(parsed) = Url::parse(target) {
                        if same_origin(&parsed, origin) && kind.is_clickable() {
                            links.push(target.clone());
                        }
                    }
                }

                elements.push(PageElement {
                    kind: *kind,
                    text: text.map(str::to_string),
                    url: absolute,
                    locator,
                });
            }
        }

        let crawled = CrawledPage {
            path: base.path().to_string(),
            url: landed,
            title,
            depth,
            crawled_at: Utc::now(),
            elements,
        };
        Ok((crawled, links))
    }
}
