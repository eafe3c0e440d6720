//! Chrome DevTools Protocol driver, behind the `browser` feature.
//!
//! [`CdpEngine`] launches a headless Chromium and implements the driver seam
//! over JavaScript evaluation. Scene recording polls `Page.captureScreenshot`
//! at the configured frame rate and muxes the frames with [`VideoRecorder`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::{Page, ScreenshotParams};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::auth::Cookie;
use crate::driver::{BrowserContext, BrowserEngine, ContextConfig, ElementHandle, PageHandle};
use crate::locator::{js_string, Query};
use crate::recording::{VideoConfig, VideoRecorder};
use crate::result::{GrabarError, GrabarResult};
use crate::storyboard::ScrollDirection;

/// A launched Chromium instance implementing [`BrowserEngine`].
#[derive(Debug)]
pub struct CdpEngine {
    browser: Arc<Mutex<Browser>>,
    event_loop: JoinHandle<()>,
}

impl CdpEngine {
    /// Launch headless Chromium sized for recording.
    pub async fn launch(video: &VideoConfig) -> GrabarResult<Self> {
        let config = BrowserConfig::builder()
            .window_size(video.width, video.height)
            .build()
            .map_err(|e| GrabarError::BrowserLaunchError { message: e })?;
        let (browser, mut handler) =
            Browser::launch(config)
                .await
                .map_err(|e| GrabarError::BrowserLaunchError {
                    message: e.to_string(),
                })?;
        let event_loop = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            event_loop,
        })
    }
}

#[async_trait]
impl BrowserEngine for CdpEngine {
    async fn new_context(&self, config: ContextConfig) -> GrabarResult<Box<dyn BrowserContext>> {
        Ok(Box::new(CdpContext {
            browser: Arc::clone(&self.browser),
            video: config.video,
            video_dir: config.video_dir,
            recording: Arc::new(Mutex::new(None)),
        }))
    }

    async fn close(&self) -> GrabarResult<()> {
        // Shut the Chromium process down before killing its event loop;
        // aborting first would strand the child process.
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            tracing::warn!(error = %e, "browser close failed");
        }
        if let Err(e) = browser.wait().await {
            tracing::debug!(error = %e, "browser did not exit cleanly");
        }
        self.event_loop.abort();
        Ok(())
    }
}

#[derive(Debug)]
struct Recording {
    recorder: VideoRecorder,
    capture: JoinHandle<()>,
}

#[derive(Debug)]
struct CdpContext {
    browser: Arc<Mutex<Browser>>,
    video: Option<VideoConfig>,
    video_dir: Option<PathBuf>,
    recording: Arc<Mutex<Option<Recording>>>,
}

#[async_trait]
impl BrowserContext for CdpContext {
    async fn new_page(&self) -> GrabarResult<Box<dyn PageHandle>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| GrabarError::PageError {
                message: e.to_string(),
            })?;

        if let Some(video) = &self.video {
            let mut recorder = VideoRecorder::new(video.clone());
            recorder.start()?;
            let frames = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
            let capture = spawn_capture(page.clone(), video.clone(), Arc::clone(&frames));
            let mut slot = self.recording.lock().await;
            *slot = Some(Recording {
                recorder,
                capture,
            });
            // Collected frames are drained on close.
            drop(slot);
            let recording = Arc::clone(&self.recording);
            tokio::spawn(drain_frames(frames, recording));
        }

        Ok(Box::new(CdpPage { page }))
    }

    async fn close(self: Box<Self>) -> GrabarResult<()> {
        let mut slot = self.recording.lock().await;
        if let Some(mut recording) = slot.take() {
            recording.capture.abort();
            match recording.recorder.stop() {
                Ok(mp4) => {
                    if let Some(dir) = &self.video_dir {
                        tokio::fs::create_dir_all(dir).await?;
                        tokio::fs::write(dir.join("recording.mp4"), &mp4).await?;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "recording produced no video"),
            }
        }
        Ok(())
    }
}

fn spawn_capture(
    page: Page,
    video: VideoConfig,
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
) -> JoinHandle<()> {
    let interval = Duration::from_millis(1000 / u64::from(video.fps.max(1)));
    tokio::spawn(async move {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Jpeg)
            .quality(i64::from(video.jpeg_quality))
            .build();
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match page.screenshot(params.clone()).await {
                Ok(jpeg) => frames.lock().await.push(jpeg),
                Err(e) => {
                    tracing::debug!(error = %e, "screenshot failed, stopping capture");
                    break;
                }
            }
        }
    })
}

async fn drain_frames(frames: Arc<Mutex<Vec<Vec<u8>>>>, recording: Arc<Mutex<Option<Recording>>>) {
    loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let mut pending = frames.lock().await;
        let drained: Vec<Vec<u8>> = pending.drain(..).collect();
        drop(pending);
        let mut slot = recording.lock().await;
        let Some(rec) = slot.as_mut() else { break };
        for jpeg in drained {
            if rec.recorder.add_encoded_frame(jpeg).is_err() {
                return;
            }
        }
    }
}

#[derive(Debug)]
struct CdpPage {
    page: Page,
}

impl CdpPage {
    async fn eval<T: serde::de::DeserializeOwned + Unpin>(
        &self,
        js: String,
        deadline: Duration,
    ) -> GrabarResult<T> {
        let result = tokio::time::timeout(deadline, self.page.evaluate(js))
            .await
            .map_err(|_| GrabarError::Timeout {
                ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(|e| GrabarError::PageError {
                message: e.to_string(),
            })?;
        result.into_value().map_err(|e| GrabarError::PageError {
            message: e.to_string(),
        })
    }
}

/// JavaScript expression yielding the array of elements a query matches.
fn array_js(query: &Query) -> String {
    match query {
        Query::Css(css) => format!(
            "Array.from(document.querySelectorAll({}))",
            js_string(css)
        ),
        Query::Text { text, exact } => {
            let matcher = if *exact {
                format!("(el.textContent||'').trim() === {}", js_string(text))
            } else {
                format!("(el.textContent||'').includes({})", js_string(text))
            };
            format!(
                "Array.from(document.querySelectorAll('a, button, [role], h1, h2, h3, label, span, p')).filter(el => {matcher})"
            )
        }
        Query::Role { role, text } => {
            let tag = match role.as_str() {
                "link" => "a",
                other => other,
            };
            format!(
                "Array.from(document.querySelectorAll({})).filter(el => (el.textContent||'').includes({}))",
                js_string(&format!("{tag}, [role=\"{role}\"]")),
                js_string(text)
            )
        }
    }
}

const DESCRIBE_JS: &str = "el => ({ \
    tag: el.tagName.toLowerCase(), \
    id: el.id || (el.dataset ? el.dataset.testid : null) || null, \
    text: ((el.textContent || '').trim().slice(0, 200)) || null, \
    href: el.href || null, \
    ariaLabel: el.getAttribute('aria-label'), \
    visible: !!(el.offsetWidth || el.offsetHeight) })";

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsElement {
    tag: String,
    id: Option<String>,
    text: Option<String>,
    href: Option<String>,
    aria_label: Option<String>,
    visible: bool,
}

impl From<JsElement> for ElementHandle {
    fn from(e: JsElement) -> Self {
        Self {
            tag: e.tag,
            id: e.id,
            text: e.text,
            href: e.href,
            aria_label: e.aria_label,
            visible: e.visible,
        }
    }
}

#[async_trait]
impl PageHandle for CdpPage {
    async fn goto(&self, url: &str, deadline: Duration) -> GrabarResult<()> {
        let navigation = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<(), chromiumoxide::error::CdpError>(())
        };
        tokio::time::timeout(deadline, navigation)
            .await
            .map_err(|_| GrabarError::Timeout {
                ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(|e| GrabarError::NavigationError {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    async fn current_url(&self) -> GrabarResult<String> {
        self.page
            .url()
            .await
            .map_err(|e| GrabarError::PageError {
                message: e.to_string(),
            })
            .map(|u| u.unwrap_or_default())
    }

    async fn title(&self) -> GrabarResult<String> {
        self.page
            .get_title()
            .await
            .map_err(|e| GrabarError::PageError {
                message: e.to_string(),
            })
            .map(Option::unwrap_or_default)
    }

    async fn query_all(
        &self,
        query: &Query,
        deadline: Duration,
    ) -> GrabarResult<Vec<ElementHandle>> {
        let js = format!("({}).map({DESCRIBE_JS})", array_js(query));
        let elements: Vec<JsElement> = self.eval(js, deadline).await?;
        Ok(elements.into_iter().map(ElementHandle::from).collect())
    }

    async fn click(&self, query: &Query, deadline: Duration) -> GrabarResult<()> {
        let js = format!(
            "(() => {{ const el = {}; if (!el) return false; \
             el.scrollIntoView({{ block: 'center' }}); el.click(); return true; }})()",
            query.to_js()
        );
        let clicked: bool = self.eval(js, deadline).await?;
        if clicked {
            Ok(())
        } else {
            Err(GrabarError::ElementNotFound {
                target: query.describe(),
            })
        }
    }

    async fn fill(&self, query: &Query, value: &str, deadline: Duration) -> GrabarResult<()> {
        let js = format!(
            "(() => {{ const el = {}; if (!el) return false; el.focus(); \
             el.value = {}; el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
            query.to_js(),
            js_string(value)
        );
        let filled: bool = self.eval(js, deadline).await?;
        if filled {
            Ok(())
        } else {
            Err(GrabarError::ElementNotFound {
                target: query.describe(),
            })
        }
    }

    async fn text_content(
        &self,
        query: &Query,
        deadline: Duration,
    ) -> GrabarResult<Option<String>> {
        let js = format!(
            "(() => {{ const el = {}; return el ? (el.textContent || '').trim() : null; }})()",
            query.to_js()
        );
        self.eval(js, deadline).await
    }

    async fn is_visible(&self, query: &Query, deadline: Duration) -> GrabarResult<bool> {
        let js = format!(
            "(() => {{ const el = {}; return !!(el && (el.offsetWidth || el.offsetHeight)); }})()",
            query.to_js()
        );
        self.eval(js, deadline).await
    }

    async fn inject_style(&self, css: &str) -> GrabarResult<()> {
        let js = format!(
            "(() => {{ const style = document.createElement('style'); \
             style.textContent = {}; document.head.appendChild(style); }})()",
            js_string(css)
        );
        self.page
            .evaluate(js)
            .await
            .map_err(|e| GrabarError::PageError {
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn scroll(&self, direction: ScrollDirection) -> GrabarResult<()> {
        let js = match direction {
            ScrollDirection::Up => "window.scrollBy(0, -600)".to_string(),
            ScrollDirection::Down => "window.scrollBy(0, 600)".to_string(),
            ScrollDirection::Top => "window.scrollTo(0, 0)".to_string(),
            ScrollDirection::Bottom => {
                "window.scrollTo(0, document.body.scrollHeight)".to_string()
            }
        };
        self.page
            .evaluate(js)
            .await
            .map_err(|e| GrabarError::PageError {
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> GrabarResult<()> {
        for cookie in cookies {
            let param = CookieParam::builder()
                .name(&cookie.name)
                .value(&cookie.value)
                .domain(&cookie.domain)
                .path(&cookie.path)
                .secure(cookie.secure)
                .http_only(cookie.http_only)
                .build()
                .map_err(|e| GrabarError::PageError { message: e })?;
            self.page
                .set_cookie(param)
                .await
                .map_err(|e| GrabarError::PageError {
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }

    async fn body_text(&self) -> GrabarResult<String> {
        let result = self
            .page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .map_err(|e| GrabarError::PageError {
                message: e.to_string(),
            })?;
        result.into_value().map_err(|e| GrabarError::PageError {
            message: e.to_string(),
        })
    }
}
