//! Storyboard replay.
//!
//! Scenes run in order and fail fast: the first scene that fails aborts the
//! storyboard, and only scenes that completed contribute a
//! [`RecordingResult`]. Each scene gets a fresh recorded context, an
//! execution trace, and two artifacts: `scene-NN.<ext>` and
//! `scene-NN.trace.zip`.
//!
//! Clicks are the one lenient action: a click whose root cause is a missing
//! element is skipped with a warning, because marketing pages drift faster
//! than storyboards. Everything else fails the scene.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::auth::{AuthConfig, Authenticator};
use crate::crawler::CrawlMap;
use crate::driver::{BrowserContext, BrowserEngine, ContextConfig, PageHandle};
use crate::locator::{Locator, Query};
use crate::recording::VideoConfig;
use crate::resolver::{resolve_element, resolve_navigation};
use crate::result::{GrabarError, GrabarResult};
use crate::storage::Storage;
use crate::storyboard::{Action, RecordingResult, Scene, Storyboard};
use crate::trace::ExecutionTrace;

/// Replay timeouts and recording settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Default per-action deadline, in milliseconds
    pub action_timeout_ms: u64,
    /// Deadline for each rung of the click ladder, in milliseconds
    pub click_attempt_timeout_ms: u64,
    /// Hard cap applied to `wait` actions, in milliseconds
    pub max_wait_ms: u64,
    /// Pause used by `wait` actions that give no duration, in milliseconds
    pub default_wait_ms: u64,
    /// Video settings for scene recordings
    #[serde(skip)]
    pub video: VideoConfig,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: 10_000,
            click_attempt_timeout_ms: 2_000,
            max_wait_ms: 10_000,
            default_wait_ms: 1_000,
            video: VideoConfig::default(),
        }
    }
}

/// Outcome of a whole storyboard run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Results for scenes that completed, in order
    pub scene_results: Vec<RecordingResult>,
    /// Whether every scene completed
    pub success: bool,
    /// Failure message of the scene that aborted the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The replay engine. Browser, storage, and authenticator are job-scoped
/// and passed per run.
#[derive(Debug, Clone, Default)]
pub struct ReplayEngine {
    config: ReplayConfig,
}

impl ReplayEngine {
    /// Engine with explicit settings.
    #[must_use]
    pub fn new(config: ReplayConfig) -> Self {
        Self { config }
    }

    /// Replay `storyboard` against `base_url`, recording every scene.
    ///
    /// `Err` is reserved for problems that prevent the run from starting at
    /// all (invalid storyboard, browser launch). Scene failures land in the
    /// returned report instead.
    #[allow(clippy::too_many_arguments)]
    pub async fn replay(
        &self,
        browser: &dyn BrowserEngine,
        storage: &dyn Storage,
        authenticator: &dyn Authenticator,
        auth: Option<&AuthConfig>,
        storyboard: &Storyboard,
        base_url: &str,
        map: Option<&CrawlMap>,
    ) -> GrabarResult<ReplayReport> {
        storyboard.validate()?;
        let mut report = ReplayReport {
            scene_results: Vec::new(),
            success: true,
            error: None,
        };

        for (index, scene) in storyboard.scenes.iter().enumerate() {
            let label = scene_label(index);
            tracing::info!(scene = %scene.id, %label, "replaying scene");
            match self
                .record_scene(
                    browser,
                    storage,
                    authenticator,
                    auth,
                    storyboard,
                    scene,
                    &label,
                    base_url,
                    map,
                )
                .await
            {
                Ok(result) => report.scene_results.push(result),
                Err(e) => {
                    tracing::error!(scene = %scene.id, error = %e, "scene failed, aborting run");
                    report.success = false;
                    report.error = Some(format!("scene '{}': {e}", scene.id));
                    break;
                }
            }
        }
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_scene(
        &self,
        browser: &dyn BrowserEngine,
        storage: &dyn Storage,
        authenticator: &dyn Authenticator,
        auth: Option<&AuthConfig>,
        storyboard: &Storyboard,
        scene: &Scene,
        label: &str,
        base_url: &str,
        map: Option<&CrawlMap>,
    ) -> GrabarResult<RecordingResult> {
        let started = Instant::now();
        let mut trace = ExecutionTrace::new(&scene.id);
        let trace_path = format!("{label}.trace.zip");

        let setup = trace.begin_span("setup");
        let video_dir = storage.full_path(label);
        let context_config = match video_dir.clone() {
            Some(dir) => ContextConfig::recording(self.config.video.clone(), dir),
            None => ContextConfig::headless(),
        };
        let context = browser.new_context(context_config).await?;
        let page = match context.new_page().await {
            Ok(page) => page,
            Err(e) => {
                trace.fail_span(setup, e.to_string());
                Self::teardown(context, &mut trace, storage, &trace_path).await;
                return Err(e);
            }
        };
        trace.end_span(setup);

        if let Some(auth) = auth {
            let span = trace.begin_span("auth");
            if let Err(e) = authenticator.authenticate(page.as_ref(), base_url, auth).await {
                trace.fail_span(span, e.to_string());
                Self::teardown(context, &mut trace, storage, &trace_path).await;
                return Err(e);
            }
            trace.end_span(span);
        }

        let blur_css = blur_stylesheet(&storyboard.blur_selectors_for(scene));
        if let Some(css) = &blur_css {
            if let Err(e) = page.inject_style(css).await {
                tracing::warn!(error = %e, "blur stylesheet injection failed");
            }
        }

        let outcome = self
            .run_actions(page.as_ref(), scene, base_url, map, blur_css.as_deref(), &mut trace)
            .await;
        drop(page);
        Self::teardown(context, &mut trace, storage, &trace_path).await;
        outcome?;

        let video_path = if video_dir.is_some() {
            Some(finalize_video(storage, label).await?)
        } else {
            None
        };

        Ok(RecordingResult {
            scene_id: scene.id.clone(),
            video_path: video_path.unwrap_or_default(),
            trace_path,
            success: true,
            error: None,
            retry_count: 0,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Close the context and archive the trace. Runs on every exit path so
    /// a failed scene still leaves its trace behind.
    async fn teardown(
        context: Box<dyn BrowserContext>,
        trace: &mut ExecutionTrace,
        storage: &dyn Storage,
        trace_path: &str,
    ) {
        let span = trace.begin_span("teardown");
        match context.close().await {
            Ok(()) => trace.end_span(span),
            Err(e) => {
                tracing::warn!(error = %e, "context close failed");
                trace.fail_span(span, e.to_string());
            }
        }
        trace.finish();
        if let Err(e) = trace.write_zip(storage, trace_path).await {
            tracing::warn!(error = %e, path = trace_path, "trace archive failed");
        }
    }

    async fn run_actions(
        &self,
        page: &dyn PageHandle,
        scene: &Scene,
        base_url: &str,
        map: Option<&CrawlMap>,
        blur_css: Option<&str>,
        trace: &mut ExecutionTrace,
    ) -> GrabarResult<()> {
        let mut actions = scene.actions.clone();
        // Scenes written against a crawl map may assume they start on the
        // site; give them the start page when they never navigate.
        if map.is_some() && !actions.iter().any(|a| matches!(a, Action::Navigate { .. })) {
            actions.insert(
                0,
                Action::Navigate {
                    value: base_url.to_string(),
                    timeout_ms: None,
                    description: "start page".to_string(),
                },
            );
        }

        for action in &actions {
            let span = trace.begin_span(format!("action:{}", action.describe()));
            match self.dispatch(page, action, base_url, map, blur_css).await {
                Ok(()) => trace.end_span(span),
                Err(e)
                    if matches!(action, Action::Click { .. }) && e.is_element_not_found() =>
                {
                    tracing::warn!(
                        scene = %scene.id,
                        action = %action.describe(),
                        "click target missing, skipping"
                    );
                    trace.set_attr(span, "skipped", "true");
                    trace.end_span(span);
                }
                Err(e) => {
                    let enriched = Self::enrich(e, action, page).await;
                    trace.fail_span(span, enriched.to_string());
                    return Err(enriched);
                }
            }
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        page: &dyn PageHandle,
        action: &Action,
        base_url: &str,
        map: Option<&CrawlMap>,
        blur_css: Option<&str>,
    ) -> GrabarResult<()> {
        let deadline = Duration::from_millis(
            action.timeout_override().unwrap_or(self.config.action_timeout_ms),
        );
        match action {
            Action::Navigate {
                value, description, ..
            } => {
                let intent = (!description.is_empty()).then_some(description.as_str());
                let url = resolve_navigation(value, intent, base_url, map)?;
                page.goto(&url, deadline).await?;
                let body = page.body_text().await?;
                if body.trim().is_empty() {
                    return Err(GrabarError::PageError {
                        message: format!("blank page after navigating to {url}"),
                    });
                }
                let title = page.title().await?;
                if let Some(marker) = error_page_marker(&title, &body) {
                    return Err(GrabarError::PageError {
                        message: format!("error page after navigating to {url} ({marker})"),
                    });
                }
                if let Some(css) = blur_css {
                    if let Err(e) = page.inject_style(css).await {
                        tracing::warn!(error = %e, "blur stylesheet injection failed");
                    }
                }
                Ok(())
            }
            Action::Click { locator, .. } => {
                self.dispatch_click(page, locator, map, blur_css).await
            }
            Action::Type { locator, value, .. } => {
                Self::dispatch_type(page, locator, value, deadline).await
            }
            Action::Wait { duration_ms, .. } => {
                let capped = duration_ms
                    .unwrap_or(self.config.default_wait_ms)
                    .min(self.config.max_wait_ms);
                tokio::time::sleep(Duration::from_millis(capped)).await;
                Ok(())
            }
            Action::Assert { locator, value, .. } => {
                Self::dispatch_assert(page, locator, value.as_deref(), deadline).await
            }
            Action::Scroll { value, .. } => page.scroll(*value).await,
        }
    }

    /// The click ladder. Rungs are tried in order; a missing element moves
    /// to the next rung, any other failure aborts.
    async fn dispatch_click(
        &self,
        page: &dyn PageHandle,
        locator: &Locator,
        map: Option<&CrawlMap>,
        blur_css: Option<&str>,
    ) -> GrabarResult<()> {
        let target = locator.target_text();
        let mut queries: Vec<Query> = Vec::new();

        if let (Some(map), Some(text)) = (map, target) {
            if let Ok(current) = page.current_url().await {
                if let Some(crawled) = map.page_for(&current) {
                    match resolve_element(crawled, text) {
                        // The crawl saw this page and found no such element.
                        // Do not even attempt the click.
                        None => {
                            return Err(GrabarError::ElementNotFound {
                                target: text.to_string(),
                            })
                        }
                        Some(element) => queries.extend(element.locator.queries()),
                    }
                }
            }
        }

        queries.push(locator.primary_query());
        if let Some(text) = target {
            queries.push(Query::text_exact(text));
            queries.push(Query::Role {
                role: "button".to_string(),
                text: text.to_string(),
            });
            queries.push(Query::Role {
                role: "link".to_string(),
                text: text.to_string(),
            });
        }
        for fallback in locator.fallbacks.iter().take(2) {
            queries.push(Query::parse(fallback));
        }
        queries.dedup();

        let attempt = Duration::from_millis(self.config.click_attempt_timeout_ms);
        for query in &queries {
            match page.click(query, attempt).await {
                Ok(()) => {
                    // The click may have navigated; styles do not survive.
                    if let Some(css) = blur_css {
                        if let Err(e) = page.inject_style(css).await {
                            tracing::warn!(error = %e, "blur stylesheet injection failed");
                        }
                    }
                    return Ok(());
                }
                Err(e) if e.is_element_not_found() => {
                    tracing::debug!(query = %query.describe(), "click rung missed");
                }
                Err(e) => return Err(e),
            }
        }
        Err(GrabarError::ElementNotFound {
            target: locator.value.clone(),
        })
    }

    async fn dispatch_type(
        page: &dyn PageHandle,
        locator: &Locator,
        value: &str,
        deadline: Duration,
    ) -> GrabarResult<()> {
        for query in locator.queries() {
            match page.fill(&query, value, deadline).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_element_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(GrabarError::InputError {
            target: locator.value.clone(),
            message: "no input matched any locator query".to_string(),
        })
    }

    async fn dispatch_assert(
        page: &dyn PageHandle,
        locator: &Locator,
        expected: Option<&str>,
        deadline: Duration,
    ) -> GrabarResult<()> {
        for query in locator.queries() {
            if !page.is_visible(&query, deadline).await? {
                continue;
            }
            let Some(expected) = expected else {
                return Ok(());
            };
            let text = page.text_content(&query, deadline).await?.unwrap_or_default();
            if text.contains(expected) {
                return Ok(());
            }
            return Err(GrabarError::AssertionFailed {
                message: format!(
                    "element '{}' shows '{text}', expected it to contain '{expected}'",
                    locator.value
                ),
            });
        }
        Err(GrabarError::AssertionFailed {
            message: format!("element '{}' is not visible", locator.value),
        })
    }

    /// Attach the page state a reader needs to make sense of the failure:
    /// where it happened and what could actually be clicked there.
    async fn enrich(error: GrabarError, action: &Action, page: &dyn PageHandle) -> GrabarError {
        let url = page.current_url().await.unwrap_or_default();
        let title = page.title().await.unwrap_or_default();
        let clickable = Query::Css("a, button".to_string());
        let visible: Vec<String> = page
            .query_all(&clickable, Duration::from_secs(2))
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|e| e.visible)
            .filter_map(|e| e.text)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .take(10)
            .collect();
        error.with_page_context(action.describe(), url, title, visible)
    }
}

fn scene_label(index: usize) -> String {
    format!("scene-{:02}", index + 1)
}

/// Markers that identify a served error page. Only the title and the first
/// body line are checked; deeper body text mentions these too often.
const ERROR_MARKERS: &[&str] = &[
    "404",
    "not found",
    "403",
    "forbidden",
    "500",
    "internal server error",
    "502",
    "bad gateway",
    "503",
    "service unavailable",
];

fn error_page_marker(title: &str, body: &str) -> Option<&'static str> {
    let first_line = body
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    for haystack in [title, first_line] {
        let haystack = haystack.to_lowercase();
        if let Some(marker) = ERROR_MARKERS.iter().find(|m| haystack.contains(**m)) {
            return Some(marker);
        }
    }
    None
}

fn blur_stylesheet(selectors: &[String]) -> Option<String> {
    if selectors.is_empty() {
        return None;
    }
    let rules: Vec<String> = selectors
        .iter()
        .map(|s| format!("{s} {{ filter: blur(8px) !important; }}"))
        .collect();
    Some(rules.join("\n"))
}

/// Locate the raw recording the context wrote into `label/` and move it to
/// `label.<ext>`, keeping whatever container the driver produced.
async fn finalize_video(storage: &dyn Storage, label: &str) -> GrabarResult<String> {
    let raw_files = storage.list_files(&format!("{label}/")).await?;
    let raw = raw_files
        .iter()
        .find(|f| {
            f.ends_with(".mp4") || f.ends_with(".webm")
        })
        .ok_or_else(|| GrabarError::VideoRecording {
            message: format!("no recording found under {label}/"),
        })?;
    let extension = raw.rsplit('.').next().unwrap_or("mp4");
    let published = format!("{label}.{extension}");
    storage.rename(raw, &published).await?;
    Ok(published)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::DefaultAuthenticator;
    use crate::crawler::{CrawlEngine, CrawlConfig};
    use crate::driver::{MockBrowser, MockPageData};
    use crate::locator::Locator;
    use crate::storage::FsStorage;

    const BASE: &str = "https://site.test/";

    fn demo_site() -> MockBrowser {
        MockBrowser::new()
            .with_page(
                BASE,
                MockPageData::new("Home")
                    .heading("Welcome")
                    .nav_link("Pricing", "https://site.test/pricing")
                    .button("Get started"),
            )
            .with_page(
                "https://site.test/pricing",
                MockPageData::new("Pricing").heading("Plans").button("Buy"),
            )
    }

    fn scene(id: &str, actions: Vec<Action>) -> Scene {
        Scene {
            id: id.to_string(),
            title: id.to_string(),
            expected_outcome: None,
            actions,
            blur_selectors: vec![],
        }
    }

    fn board(scenes: Vec<Scene>) -> Storyboard {
        Storyboard {
            name: "demo".to_string(),
            scenes,
            blur_selectors: vec![],
        }
    }

    fn navigate(value: &str) -> Action {
        Action::Navigate {
            value: value.to_string(),
            timeout_ms: None,
            description: String::new(),
        }
    }

    fn click(text: &str) -> Action {
        Action::Click {
            locator: Locator::text(text),
            timeout_ms: None,
            description: String::new(),
        }
    }

    fn init_test_logging() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    async fn run(
        browser: &MockBrowser,
        storyboard: &Storyboard,
        map: Option<&CrawlMap>,
    ) -> (ReplayReport, FsStorage, tempfile::TempDir) {
        init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let report = ReplayEngine::default()
            .replay(
                browser,
                &storage,
                &DefaultAuthenticator::default(),
                None,
                storyboard,
                BASE,
                map,
            )
            .await
            .unwrap();
        (report, storage, dir)
    }

    async fn crawl_map(browser: &MockBrowser) -> CrawlMap {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        CrawlEngine::new(CrawlConfig::default())
            .crawl(
                browser,
                &storage,
                &DefaultAuthenticator::default(),
                None,
                BASE,
            )
            .await
            .unwrap()
    }

    mod artifact_tests {
        use super::*;

        #[tokio::test]
        async fn test_each_scene_gets_video_and_trace() {
            let browser = demo_site();
            let storyboard = board(vec![
                scene("intro", vec![navigate(BASE)]),
                scene("pricing", vec![navigate("/pricing"), click("Buy")]),
            ]);
            let (report, storage, _dir) = run(&browser, &storyboard, None).await;

            assert!(report.success);
            assert_eq!(report.scene_results.len(), 2);
            assert_eq!(report.scene_results[0].video_path, "scene-01.mp4");
            assert_eq!(report.scene_results[1].trace_path, "scene-02.trace.zip");
            assert!(storage.exists("scene-01.mp4").await);
            assert!(storage.exists("scene-01.trace.zip").await);
            assert!(storage.exists("scene-02.mp4").await);
            assert!(storage.exists("scene-02.trace.zip").await);
            // Publishing moves the raw recording; no duplicate stays behind.
            assert!(!storage.exists("scene-01/recording.mp4").await);
            assert!(!storage.exists("scene-02/recording.mp4").await);
        }

        #[tokio::test]
        async fn test_trace_spans_cover_scene_lifecycle() {
            use std::io::Read as _;

            let browser = demo_site();
            let storyboard = board(vec![scene("intro", vec![navigate(BASE)])]);
            let (_, storage, _dir) = run(&browser, &storyboard, None).await;

            let bytes = storage.read_file("scene-01.trace.zip").await.unwrap();
            let mut archive =
                zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
            let mut entry = archive.by_name(crate::trace::TRACE_ENTRY).unwrap();
            let mut json = String::new();
            entry.read_to_string(&mut json).unwrap();
            let trace: ExecutionTrace = serde_json::from_str(&json).unwrap();

            let names: Vec<&str> = trace.spans.iter().map(|s| s.name.as_str()).collect();
            assert!(names.contains(&"setup"));
            assert!(names.contains(&"teardown"));
        }

        #[tokio::test]
        async fn test_results_carry_duration_and_no_retries() {
            let browser = demo_site();
            let storyboard = board(vec![scene("intro", vec![navigate(BASE)])]);
            let (report, _, _dir) = run(&browser, &storyboard, None).await;
            let result = &report.scene_results[0];
            assert!(result.success);
            assert_eq!(result.retry_count, 0);
        }
    }

    mod fail_fast_tests {
        use super::*;

        #[tokio::test]
        async fn test_failing_scene_aborts_later_scenes() {
            let browser = demo_site();
            let storyboard = board(vec![
                scene("intro", vec![navigate(BASE)]),
                scene(
                    "broken",
                    vec![
                        navigate(BASE),
                        Action::Type {
                            locator: Locator::test_id("missing-input"),
                            value: "hello".to_string(),
                            timeout_ms: None,
                            description: String::new(),
                        },
                    ],
                ),
                scene("never", vec![navigate("/pricing")]),
            ]);
            let (report, storage, _dir) = run(&browser, &storyboard, None).await;

            assert!(!report.success);
            assert_eq!(report.scene_results.len(), 1);
            assert_eq!(report.scene_results[0].scene_id, "intro");
            assert!(report.error.as_deref().unwrap().contains("broken"));
            // The failed scene still leaves its trace behind.
            assert!(storage.exists("scene-02.trace.zip").await);
            // Scene three never ran.
            assert!(!storage.exists("scene-03.trace.zip").await);
        }

        #[tokio::test]
        async fn test_failure_reports_visible_clickable_text() {
            let browser = demo_site();
            let storyboard = board(vec![scene(
                "broken",
                vec![
                    navigate(BASE),
                    Action::Type {
                        locator: Locator::test_id("missing-input"),
                        value: "hello".to_string(),
                        timeout_ms: None,
                        description: String::new(),
                    },
                ],
            )]);
            let (report, _, _dir) = run(&browser, &storyboard, None).await;
            assert!(!report.success);
            let message = report.error.unwrap();
            assert!(message.contains("Get started"), "{message}");
            assert!(!message.contains("Welcome"), "{message}");
        }

        #[tokio::test]
        async fn test_unresolved_navigation_fails_scene() {
            let browser = demo_site();
            let map = crawl_map(&browser).await;
            let storyboard = board(vec![scene(
                "contact",
                vec![Action::Navigate {
                    value: "contact page".to_string(),
                    timeout_ms: None,
                    description: "open the contact form".to_string(),
                }],
            )]);
            let (report, _, _dir) = run(&browser, &storyboard, Some(&map)).await;
            assert!(!report.success);
            assert!(report.error.as_deref().unwrap().contains("Available paths"));
        }

        #[tokio::test]
        async fn test_error_page_fails_scene() {
            let browser = demo_site().with_page(
                "https://site.test/broken",
                MockPageData::new("404 Not Found"),
            );
            let storyboard = board(vec![scene(
                "missing",
                vec![navigate("https://site.test/broken")],
            )]);
            let (report, _, _dir) = run(&browser, &storyboard, None).await;
            assert!(!report.success);
            assert!(report.error.as_deref().unwrap().contains("error page"));
        }

        #[tokio::test]
        async fn test_blank_page_fails_scene() {
            let browser = demo_site();
            let storyboard = board(vec![scene(
                "void",
                vec![navigate("https://site.test/nowhere")],
            )]);
            let (report, _, _dir) = run(&browser, &storyboard, None).await;
            assert!(!report.success);
            assert!(report.error.as_deref().unwrap().contains("blank page"));
        }
    }

    mod click_policy_tests {
        use super::*;

        #[tokio::test]
        async fn test_missing_click_is_skipped_scene_succeeds() {
            let browser = demo_site();
            let storyboard = board(vec![scene(
                "intro",
                vec![navigate(BASE), click("Subscribe")],
            )]);
            let (report, _, _dir) = run(&browser, &storyboard, None).await;
            assert!(report.success);
            assert_eq!(report.scene_results.len(), 1);
        }

        #[tokio::test]
        async fn test_map_prefilter_skips_without_attempting() {
            let browser = demo_site();
            let map = crawl_map(&browser).await;
            let storyboard = board(vec![scene(
                "intro",
                vec![navigate(BASE), click("Subscribe")],
            )]);
            let (report, _, _dir) = run(&browser, &storyboard, Some(&map)).await;
            assert!(report.success);
            let attempts = browser.calls_matching("click:");
            assert!(
                attempts.iter().all(|c| !c.contains("Subscribe")),
                "prefilter must suppress the attempt, saw {attempts:?}"
            );
        }

        #[tokio::test]
        async fn test_known_element_clicked_through_map() {
            let browser = demo_site();
            let map = crawl_map(&browser).await;
            let storyboard = board(vec![scene(
                "intro",
                vec![navigate(BASE), click("Get started")],
            )]);
            let (report, _, _dir) = run(&browser, &storyboard, Some(&map)).await;
            assert!(report.success);
            assert!(!browser.calls_matching("click:").is_empty());
        }
    }

    mod implicit_navigation_tests {
        use super::*;

        #[tokio::test]
        async fn test_sceneless_navigation_gets_start_page() {
            let browser = demo_site();
            let map = crawl_map(&browser).await;
            let storyboard = board(vec![scene("intro", vec![click("Get started")])]);
            let (report, _, _dir) = run(&browser, &storyboard, Some(&map)).await;
            assert!(report.success);
            assert!(browser
                .calls()
                .iter()
                .any(|c| c.starts_with("goto:https://site.test/")));
        }
    }

    mod wait_tests {
        use super::*;

        #[tokio::test]
        async fn test_wait_without_duration_uses_default() {
            let browser = demo_site();
            let engine = ReplayEngine::new(ReplayConfig {
                default_wait_ms: 1,
                ..ReplayConfig::default()
            });
            let storyboard = board(vec![scene(
                "intro",
                vec![
                    navigate(BASE),
                    Action::Wait {
                        duration_ms: None,
                        description: "settle".to_string(),
                    },
                ],
            )]);
            let dir = tempfile::tempdir().unwrap();
            let storage = FsStorage::new(dir.path());
            let report = engine
                .replay(
                    &browser,
                    &storage,
                    &DefaultAuthenticator::default(),
                    None,
                    &storyboard,
                    BASE,
                    None,
                )
                .await
                .unwrap();
            assert!(report.success);
        }
    }

    mod blur_tests {
        use super::*;

        #[tokio::test]
        async fn test_blur_selectors_injected() {
            let browser = demo_site();
            let mut storyboard = board(vec![scene("intro", vec![navigate(BASE)])]);
            storyboard.blur_selectors = vec![".email".to_string()];
            let (report, _, _dir) = run(&browser, &storyboard, None).await;
            assert!(report.success);
            let injected = browser.calls_matching("inject_style:");
            assert!(injected.iter().any(|c| c.contains(".email") && c.contains("blur")));
        }
    }

    mod validation_tests {
        use super::*;

        #[tokio::test]
        async fn test_invalid_storyboard_is_an_error_not_a_report() {
            let browser = demo_site();
            let storyboard = Storyboard {
                name: "empty".to_string(),
                scenes: vec![],
                blur_selectors: vec![],
            };
            let dir = tempfile::tempdir().unwrap();
            let storage = FsStorage::new(dir.path());
            let err = ReplayEngine::default()
                .replay(
                    &browser,
                    &storage,
                    &DefaultAuthenticator::default(),
                    None,
                    &storyboard,
                    BASE,
                    None,
                )
                .await
                .unwrap_err();
            assert!(matches!(err, GrabarError::InvalidStoryboard { .. }));
        }
    }
}
