//! grabar: crawl a web app, then replay storyboards into per-scene screen
//! recordings.
//!
//! The pipeline has two engines sharing a driver seam:
//!
//! ```text
//!   start URL ──> CrawlEngine ──> crawlSummary.json (CrawlMap)
//!                                        │
//!   storyboard ──> ReplayEngine <────────┘
//!                       │
//!                       ├── scene-01.mp4   scene-01.trace.zip
//!                       ├── scene-02.mp4   scene-02.trace.zip
//!                       └── ReplayReport
//! ```
//!
//! The crawler walks the target site breadth-first under hard bounds and
//! records every page's interactive elements with synthesized [`Locator`]s.
//! The replay engine executes scenes fail-fast, recording each one into its
//! own video and execution trace; the navigation resolver turns loose
//! storyboard targets like "the pricing page" into crawled URLs.
//!
//! Browsers, artifact storage, and authentication sit behind traits
//! ([`BrowserEngine`], [`Storage`], [`Authenticator`]); the Chromium
//! implementation is feature-gated behind `browser`, and [`MockBrowser`]
//! serves tests and offline use.
//!
//! # Example
//!
//! ```no_run
//! use grabar::{
//!     CrawlConfig, CrawlEngine, DefaultAuthenticator, FsStorage, MockBrowser, ReplayEngine,
//!     Storyboard,
//! };
//!
//! # async fn run() -> grabar::GrabarResult<()> {
//! let browser = MockBrowser::new();
//! let storage = FsStorage::new("artifacts/job-1");
//! let auth = DefaultAuthenticator::default();
//!
//! let map = CrawlEngine::new(CrawlConfig::default())
//!     .crawl(&browser, &storage, &auth, None, "https://example.com")
//!     .await?;
//!
//! let storyboard = Storyboard::from_json(r#"{
//!     "name": "tour",
//!     "scenes": [{
//!         "id": "pricing",
//!         "title": "Show pricing",
//!         "actions": [{ "kind": "navigate", "value": "pricing" }]
//!     }]
//! }"#)?;
//!
//! let report = ReplayEngine::default()
//!     .replay(&browser, &storage, &auth, None, &storyboard, "https://example.com", Some(&map))
//!     .await?;
//! assert!(report.success);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod auth;
#[cfg(feature = "browser")]
pub mod cdp;
pub mod crawler;
pub mod driver;
pub mod locator;
pub mod recording;
pub mod replay;
pub mod resolver;
pub mod result;
pub mod storage;
pub mod storyboard;
pub mod trace;

pub use auth::{AuthConfig, Authenticator, Cookie, DefaultAuthenticator};
#[cfg(feature = "browser")]
pub use cdp::CdpEngine;
pub use crawler::{canonicalize_url, CrawlConfig, CrawlEngine, CrawlMap, CrawledPage};
pub use driver::{
    BrowserContext, BrowserEngine, ContextConfig, ElementHandle, MockBrowser, MockPageData,
    PageHandle,
};
pub use locator::{ElementKind, Locator, LocatorKind, PageElement, Query};
pub use recording::{VideoConfig, VideoRecorder};
pub use replay::{ReplayConfig, ReplayEngine, ReplayReport};
pub use resolver::{resolve_element, resolve_navigation, NAV_KEYWORDS};
pub use result::{GrabarError, GrabarResult};
pub use storage::{FsStorage, MemoryStorage, Storage, CRAWL_SUMMARY_FILE};
pub use storyboard::{Action, RecordingResult, Scene, ScrollDirection, Storyboard};
pub use trace::{ExecutionTrace, SpanStatus, TracedSpan};
