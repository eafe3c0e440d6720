//! Browser driver seam.
//!
//! The crawl and replay engines never talk to a browser directly; they go
//! through [`BrowserEngine`], [`BrowserContext`], and [`PageHandle`]. The
//! CDP-backed implementation lives in `cdp` (behind the `browser` feature);
//! [`MockBrowser`] implements the same seam over an in-memory site model
//! and records every call for test assertions.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::auth::Cookie;
use crate::locator::Query;
use crate::recording::VideoConfig;
use crate::result::{GrabarError, GrabarResult};
use crate::storyboard::ScrollDirection;

/// A snapshot of one DOM element as seen by a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    /// Lowercase tag name
    pub tag: String,
    /// `id` attribute (or `data-testid`, drivers treat them alike)
    pub id: Option<String>,
    /// Trimmed text content
    pub text: Option<String>,
    /// Absolute `href` for anchors
    pub href: Option<String>,
    /// `aria-label` attribute
    pub aria_label: Option<String>,
    /// Whether the element is rendered
    pub visible: bool,
}

/// Per-context configuration handed to [`BrowserEngine::new_context`].
#[derive(Debug, Clone, Default)]
pub struct ContextConfig {
    /// Record video for this context
    pub video: Option<VideoConfig>,
    /// Directory the finalized recording is written into on close
    pub video_dir: Option<PathBuf>,
}

impl ContextConfig {
    /// Context without recording, used by the crawler.
    #[must_use]
    pub fn headless() -> Self {
        Self::default()
    }

    /// Context that records into `dir` with the given video settings.
    #[must_use]
    pub fn recording(video: VideoConfig, dir: PathBuf) -> Self {
        Self {
            video: Some(video),
            video_dir: Some(dir),
        }
    }
}

/// A running browser able to open isolated contexts. One engine instance is
/// scoped to one job and passed down explicitly.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Open a fresh context (isolated cookies and storage).
    async fn new_context(&self, config: ContextConfig) -> GrabarResult<Box<dyn BrowserContext>>;

    /// Shut the browser down.
    async fn close(&self) -> GrabarResult<()>;
}

/// An isolated browsing context. Closing it finalizes any recording into
/// the configured video directory.
#[async_trait]
pub trait BrowserContext: Send {
    /// Open a page in this context.
    async fn new_page(&self) -> GrabarResult<Box<dyn PageHandle>>;

    /// Close the context, flushing the recording to disk.
    async fn close(self: Box<Self>) -> GrabarResult<()>;
}

/// One open page. Every DOM-touching call takes an explicit deadline; the
/// driver must return [`GrabarError::Timeout`] when it elapses.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigate and wait for the load to settle.
    async fn goto(&self, url: &str, deadline: Duration) -> GrabarResult<()>;

    /// URL after redirects.
    async fn current_url(&self) -> GrabarResult<String>;

    /// Document title.
    async fn title(&self) -> GrabarResult<String>;

    /// All elements matching `query`, visible or not.
    async fn query_all(&self, query: &Query, deadline: Duration)
        -> GrabarResult<Vec<ElementHandle>>;

    /// Click the first visible element matching `query`.
    async fn click(&self, query: &Query, deadline: Duration) -> GrabarResult<()>;

    /// Fill the first visible input matching `query`.
    async fn fill(&self, query: &Query, value: &str, deadline: Duration) -> GrabarResult<()>;

    /// Text content of the first element matching `query`.
    async fn text_content(&self, query: &Query, deadline: Duration)
        -> GrabarResult<Option<String>>;

    /// Whether any element matching `query` is visible.
    async fn is_visible(&self, query: &Query, deadline: Duration) -> GrabarResult<bool>;

    /// Inject a style sheet into the current document.
    async fn inject_style(&self, css: &str) -> GrabarResult<()>;

    /// Scroll the viewport.
    async fn scroll(&self, direction: ScrollDirection) -> GrabarResult<()>;

    /// Install cookies into the context.
    async fn set_cookies(&self, cookies: &[Cookie]) -> GrabarResult<()>;

    /// Full visible body text, used for blank-page and context checks.
    async fn body_text(&self) -> GrabarResult<String>;
}

// ---------------------------------------------------------------------------
// Mock implementation
// ---------------------------------------------------------------------------

/// One element of a mock page, with the structural context the CSS matcher
/// needs (`nav a` and friends).
#[derive(Debug, Clone)]
pub struct MockElement {
    /// The element as drivers report it
    pub handle: ElementHandle,
    /// Whether it sits inside a `nav` landmark
    pub in_nav: bool,
}

/// Declarative content of one mock page.
#[derive(Debug, Clone, Default)]
pub struct MockPageData {
    /// Document title
    pub title: String,
    /// Visible body text
    pub body_text: String,
    /// Elements in document order
    pub elements: Vec<MockElement>,
}

impl MockPageData {
    /// Page with a title and a body derived from it.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            body_text: title.clone(),
            title,
            elements: Vec::new(),
        }
    }

    /// Override the visible body text.
    #[must_use]
    pub fn body(mut self, text: impl Into<String>) -> Self {
        self.body_text = text.into();
        self
    }

    /// Add a heading.
    #[must_use]
    pub fn heading(self, text: impl Into<String>) -> Self {
        self.push("h1", Some(text.into()), None, None, false)
    }

    /// Add a link inside the nav landmark.
    #[must_use]
    pub fn nav_link(self, text: impl Into<String>, href: impl Into<String>) -> Self {
        self.push("a", Some(text.into()), None, Some(href.into()), true)
    }

    /// Add a plain link.
    #[must_use]
    pub fn link(self, text: impl Into<String>, href: impl Into<String>) -> Self {
        self.push("a", Some(text.into()), None, Some(href.into()), false)
    }

    /// Add a button.
    #[must_use]
    pub fn button(self, text: impl Into<String>) -> Self {
        self.push("button", Some(text.into()), None, None, false)
    }

    /// Add a button with a stable id.
    #[must_use]
    pub fn button_with_id(self, text: impl Into<String>, id: impl Into<String>) -> Self {
        self.push("button", Some(text.into()), Some(id.into()), None, false)
    }

    /// Add a text input with an id.
    #[must_use]
    pub fn input(self, id: impl Into<String>) -> Self {
        self.push("input", None, Some(id.into()), None, false)
    }

    /// Add a form container.
    #[must_use]
    pub fn form(self) -> Self {
        self.push("form", None, None, None, false)
    }

    fn push(
        mut self,
        tag: &str,
        text: Option<String>,
        id: Option<String>,
        href: Option<String>,
        in_nav: bool,
    ) -> Self {
        self.elements.push(MockElement {
            handle: ElementHandle {
                tag: tag.to_string(),
                id,
                text,
                href,
                aria_label: None,
                visible: true,
            },
            in_nav,
        });
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    pages: HashMap<String, MockPageData>,
    redirects: HashMap<String, String>,
    failing_urls: HashSet<String>,
    calls: Mutex<Vec<String>>,
    contexts_closed: Mutex<u32>,
}

impl MockState {
    fn log(&self, call: impl Into<String>) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.into());
        }
    }

    fn resolve(&self, url: &str) -> String {
        self.redirects
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.to_string())
    }
}

/// In-memory [`BrowserEngine`] over a declarative site model. Every driver
/// call is appended to a shared history the tests can inspect.
#[derive(Debug, Clone, Default)]
pub struct MockBrowser {
    state: Arc<MockState>,
}

impl MockBrowser {
    /// Empty mock browser; every navigation lands on a blank page.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page at `url`.
    #[must_use]
    pub fn with_page(mut self, url: impl Into<String>, page: MockPageData) -> Self {
        let state = Arc::get_mut(&mut self.state)
            .unwrap_or_else(|| unreachable!("mock configured after sharing"));
        state.pages.insert(url.into(), page);
        self
    }

    /// Redirect `from` to `to` on navigation.
    #[must_use]
    pub fn with_redirect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        let state = Arc::get_mut(&mut self.state)
            .unwrap_or_else(|| unreachable!("mock configured after sharing"));
        state.redirects.insert(from.into(), to.into());
        self
    }

    /// Make navigation to `url` fail with a navigation error.
    #[must_use]
    pub fn with_failing_url(mut self, url: impl Into<String>) -> Self {
        let state = Arc::get_mut(&mut self.state)
            .unwrap_or_else(|| unreachable!("mock configured after sharing"));
        state.failing_urls.insert(url.into());
        self
    }

    /// Every call the mock has seen, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Calls starting with `prefix`.
    #[must_use]
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    /// Number of contexts closed so far.
    #[must_use]
    pub fn contexts_closed(&self) -> u32 {
        self.state
            .contexts_closed
            .lock()
            .map(|c| *c)
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrowserEngine for MockBrowser {
    async fn new_context(&self, config: ContextConfig) -> GrabarResult<Box<dyn BrowserContext>> {
        self.state.log("new_context");
        Ok(Box::new(MockContext {
            state: Arc::clone(&self.state),
            config,
        }))
    }

    async fn close(&self) -> GrabarResult<()> {
        self.state.log("close_browser");
        Ok(())
    }
}

#[derive(Debug)]
struct MockContext {
    state: Arc<MockState>,
    config: ContextConfig,
}

#[async_trait]
impl BrowserContext for MockContext {
    async fn new_page(&self) -> GrabarResult<Box<dyn PageHandle>> {
        self.state.log("new_page");
        Ok(Box::new(MockPage {
            state: Arc::clone(&self.state),
            current: Mutex::new(String::new()),
        }))
    }

    async fn close(self: Box<Self>) -> GrabarResult<()> {
        self.state.log("close_context");
        if let Ok(mut closed) = self.state.contexts_closed.lock() {
            *closed += 1;
        }
        if self.config.video.is_some() {
            if let Some(dir) = &self.config.video_dir {
                tokio::fs::create_dir_all(dir).await?;
                tokio::fs::write(dir.join("recording.mp4"), b"\x00\x00\x00\x18ftypmock").await?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct MockPage {
    state: Arc<MockState>,
    current: Mutex<String>,
}

impl MockPage {
    fn current_page(&self) -> (String, MockPageData) {
        let url = self
            .current
            .lock()
            .map(|u| u.clone())
            .unwrap_or_default();
        let page = self.state.pages.get(&url).cloned().unwrap_or_default();
        (url, page)
    }

    fn matching(&self, query: &Query) -> Vec<MockElement> {
        let (_, page) = self.current_page();
        page.elements
            .iter()
            .filter(|e| query_matches(query, e))
            .cloned()
            .collect()
    }

    fn first_visible(&self, query: &Query) -> GrabarResult<MockElement> {
        self.matching(query)
            .into_iter()
            .find(|e| e.handle.visible)
            .ok_or_else(|| GrabarError::ElementNotFound {
                target: query.describe(),
            })
    }
}

fn query_matches(query: &Query, element: &MockElement) -> bool {
    let handle = &element.handle;
    match query {
        Query::Css(selector) => selector
            .split(',')
            .map(str::trim)
            .any(|part| css_part_matches(part, element)),
        Query::Text { text, exact } => handle.text.as_deref().is_some_and(|t| {
            if *exact {
                t.trim() == text
            } else {
                t.contains(text.as_str())
            }
        }),
        Query::Role { role, text } => {
            let tag = match role.as_str() {
                "link" => "a",
                other => other,
            };
            handle.tag == tag && handle.text.as_deref().is_some_and(|t| t.contains(text.as_str()))
        }
    }
}

fn css_part_matches(part: &str, element: &MockElement) -> bool {
    let handle = &element.handle;
    if let Some(id) = part.strip_prefix('#') {
        return handle.id.as_deref() == Some(id);
    }
    if let Some(rest) = part.strip_prefix("[data-testid=") {
        let wanted = rest.trim_end_matches(']').trim_matches('"');
        return handle.id.as_deref() == Some(wanted);
    }
    if let Some(tag) = part.strip_prefix("nav ") {
        return element.in_nav && handle.tag == tag.trim();
    }
    let tag = part
        .split(|c| c == '[' || c == '.' || c == ':')
        .next()
        .unwrap_or(part)
        .trim();
    !tag.is_empty() && handle.tag == tag
}

#[async_trait]
impl PageHandle for MockPage {
    async fn goto(&self, url: &str, _deadline: Duration) -> GrabarResult<()> {
        self.state.log(format!("goto:{url}"));
        if self.state.failing_urls.contains(url) {
            return Err(GrabarError::NavigationError {
                url: url.to_string(),
                message: "connection refused".to_string(),
            });
        }
        let resolved = self.state.resolve(url);
        if let Ok(mut current) = self.current.lock() {
            *current = resolved;
        }
        Ok(())
    }

    async fn current_url(&self) -> GrabarResult<String> {
        let (url, _) = self.current_page();
        Ok(url)
    }

    async fn title(&self) -> GrabarResult<String> {
        let (_, page) = self.current_page();
        Ok(page.title)
    }

    async fn query_all(
        &self,
        query: &Query,
        _deadline: Duration,
    ) -> GrabarResult<Vec<ElementHandle>> {
        Ok(self.matching(query).into_iter().map(|e| e.handle).collect())
    }

    async fn click(&self, query: &Query, deadline: Duration) -> GrabarResult<()> {
        self.state.log(format!("click:{}", query.describe()));
        let element = self.first_visible(query)?;
        if let Some(href) = element.handle.href {
            self.goto(&href, deadline).await?;
        }
        Ok(())
    }

    async fn fill(&self, query: &Query, value: &str, _deadline: Duration) -> GrabarResult<()> {
        self.state
            .log(format!("fill:{}={value}", query.describe()));
        self.first_visible(query).map(|_| ())
    }

    async fn text_content(
        &self,
        query: &Query,
        _deadline: Duration,
    ) -> GrabarResult<Option<String>> {
        Ok(self
            .matching(query)
            .into_iter()
            .next()
            .and_then(|e| e.handle.text))
    }

    async fn is_visible(&self, query: &Query, _deadline: Duration) -> GrabarResult<bool> {
        Ok(self.matching(query).iter().any(|e| e.handle.visible))
    }

    async fn inject_style(&self, css: &str) -> GrabarResult<()> {
        self.state.log(format!("inject_style:{css}"));
        Ok(())
    }

    async fn scroll(&self, direction: ScrollDirection) -> GrabarResult<()> {
        self.state.log(format!("scroll:{direction:?}"));
        Ok(())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> GrabarResult<()> {
        for cookie in cookies {
            self.state.log(format!("set_cookie:{}", cookie.name));
        }
        Ok(())
    }

    async fn body_text(&self) -> GrabarResult<String> {
        let (_, page) = self.current_page();
        Ok(page.body_text)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn demo_browser() -> MockBrowser {
        MockBrowser::new().with_page(
            "https://example.com",
            MockPageData::new("Example")
                .heading("Welcome")
                .nav_link("Pricing", "https://example.com/pricing")
                .link("Blog", "https://example.com/blog")
                .button_with_id("Get started", "cta"),
        )
    }

    mod navigation_tests {
        use super::*;

        #[tokio::test]
        async fn test_goto_sets_current_url() {
            let browser = demo_browser();
            let ctx = browser.new_context(ContextConfig::headless()).await.unwrap();
            let page = ctx.new_page().await.unwrap();
            page.goto("https://example.com", Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(page.current_url().await.unwrap(), "https://example.com");
            assert_eq!(page.title().await.unwrap(), "Example");
        }

        #[tokio::test]
        async fn test_redirect_is_followed() {
            let browser = demo_browser().with_redirect("https://example.com/", "https://example.com");
            let ctx = browser.new_context(ContextConfig::headless()).await.unwrap();
            let page = ctx.new_page().await.unwrap();
            page.goto("https://example.com/", Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(page.current_url().await.unwrap(), "https://example.com");
        }

        #[tokio::test]
        async fn test_failing_url_errors() {
            let browser = demo_browser().with_failing_url("https://down.example.com");
            let ctx = browser.new_context(ContextConfig::headless()).await.unwrap();
            let page = ctx.new_page().await.unwrap();
            let err = page
                .goto("https://down.example.com", Duration::from_secs(5))
                .await
                .unwrap_err();
            assert!(matches!(err, GrabarError::NavigationError { .. }));
        }
    }

    mod query_tests {
        use super::*;

        async fn loaded_page(browser: &MockBrowser) -> Box<dyn PageHandle> {
            let ctx = browser.new_context(ContextConfig::headless()).await.unwrap();
            let page = ctx.new_page().await.unwrap();
            page.goto("https://example.com", Duration::from_secs(5))
                .await
                .unwrap();
            page
        }

        #[tokio::test]
        async fn test_nav_selector_excludes_plain_links() {
            let browser = demo_browser();
            let page = loaded_page(&browser).await;
            let nav = page
                .query_all(&Query::Css("nav a".to_string()), Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(nav.len(), 1);
            assert_eq!(nav[0].text.as_deref(), Some("Pricing"));
        }

        #[tokio::test]
        async fn test_testid_matches_element_id() {
            let browser = demo_browser();
            let page = loaded_page(&browser).await;
            let hits = page
                .query_all(
                    &Query::Css("[data-testid=\"cta\"]".to_string()),
                    Duration::from_secs(1),
                )
                .await
                .unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].tag, "button");
        }

        #[tokio::test]
        async fn test_click_on_link_navigates() {
            let browser = demo_browser().with_page(
                "https://example.com/pricing",
                MockPageData::new("Pricing"),
            );
            let page = loaded_page(&browser).await;
            page.click(
                &Query::Role {
                    role: "link".to_string(),
                    text: "Pricing".to_string(),
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap();
            assert_eq!(
                page.current_url().await.unwrap(),
                "https://example.com/pricing"
            );
        }

        #[tokio::test]
        async fn test_missing_element_is_not_found() {
            let browser = demo_browser();
            let page = loaded_page(&browser).await;
            let err = page
                .click(&Query::text_exact("Nope"), Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(err.is_element_not_found());
        }
    }

    mod recording_tests {
        use super::*;
        use crate::recording::VideoConfig;

        #[tokio::test]
        async fn test_close_writes_recording_file() {
            let dir = tempfile::tempdir().unwrap();
            let browser = demo_browser();
            let ctx = browser
                .new_context(ContextConfig::recording(
                    VideoConfig::default(),
                    dir.path().to_path_buf(),
                ))
                .await
                .unwrap();
            ctx.close().await.unwrap();
            assert!(dir.path().join("recording.mp4").exists());
            assert_eq!(browser.contexts_closed(), 1);
        }
    }
}
