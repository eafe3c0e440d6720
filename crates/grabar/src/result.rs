//! Result and error types for Grabar.
//!
//! The error taxonomy is split along the fail-fast boundary: every variant is
//! job-fatal except `ElementNotFound`, which the replay engine may downgrade
//! to a skipped click. Classification is typed, never inferred from message
//! text; `is_element_not_found` stays accurate under context wrapping.

use thiserror::Error;

/// Result type for Grabar operations
pub type GrabarResult<T> = Result<T, GrabarError>;

/// Errors that can occur in Grabar
#[derive(Debug, Error)]
pub enum GrabarError {
    /// Browser executable not found
    #[error("Browser not found. Install Chromium or set CHROMIUM_PATH")]
    BrowserNotFound,

    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunchError {
        /// Error message
        message: String,
    },

    /// Page-level error (query, evaluate, context handling)
    #[error("Page error: {message}")]
    PageError {
        /// Error message
        message: String,
    },

    /// Navigation to a resolved URL failed or landed on a blank/error page
    #[error("Navigation to {url} failed: {message}")]
    NavigationError {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// No resolution strategy produced a target URL
    #[error("Could not resolve navigation target '{target}' for action '{description}'. Available paths: [{}]", .available_paths.join(", "))]
    NavigationUnresolved {
        /// The value the action asked for
        target: String,
        /// The action's human-readable description
        description: String,
        /// Paths known to the crawl map at resolution time
        available_paths: Vec<String>,
    },

    /// Element lookup exhausted every strategy. The only skippable error.
    #[error("Element not found: {target}")]
    ElementNotFound {
        /// The selector or target text that was searched for
        target: String,
    },

    /// Typed input failed; always job-fatal
    #[error("Input failed on {target}: {message}")]
    InputError {
        /// The selector or target text
        target: String,
        /// Error message
        message: String,
    },

    /// Assertion failed
    #[error("Assertion failed: {message}")]
    AssertionFailed {
        /// Error message
        message: String,
    },

    /// Authentication failure (cookie injection or scripted login)
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Storyboard schema or invariant violation
    #[error("Invalid storyboard: {message}")]
    InvalidStoryboard {
        /// Error message
        message: String,
    },

    /// Operation called in the wrong state
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// Video recording error
    #[error("Video recording failed: {message}")]
    VideoRecording {
        /// Error message
        message: String,
    },

    /// Trace capture or archiving error
    #[error("Trace capture failed: {message}")]
    TraceCapture {
        /// Error message
        message: String,
    },

    /// Storage collaborator error
    #[error("Storage error on {path}: {message}")]
    Storage {
        /// Relative path involved
        path: String,
        /// Error message
        message: String,
    },

    /// Feature present in configuration but not implemented
    #[error("Unsupported: {message}")]
    Unsupported {
        /// Error message
        message: String,
    },

    /// A failure enriched with the page state it happened in
    #[error("{action} failed at {url} ({title}); visible clickable: [{}]: {source}", .visible_text.join(", "))]
    ActionContext {
        /// Description of the action that failed
        action: String,
        /// URL at failure time
        url: String,
        /// Page title at failure time
        title: String,
        /// Text of clickable elements visible at failure time
        visible_text: Vec<String>,
        /// The underlying error
        #[source]
        source: Box<GrabarError>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GrabarError {
    /// Unwrap context wrappers down to the originating error.
    #[must_use]
    pub fn root_cause(&self) -> &GrabarError {
        match self {
            Self::ActionContext { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether the root cause is a missing element. Drives the replay
    /// engine's skip-a-click policy; everything else is job-fatal.
    #[must_use]
    pub fn is_element_not_found(&self) -> bool {
        matches!(self.root_cause(), Self::ElementNotFound { .. })
    }

    /// Wrap this error with page-state diagnostics.
    #[must_use]
    pub fn with_page_context(
        self,
        action: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
        visible_text: Vec<String>,
    ) -> Self {
        Self::ActionContext {
            action: action.into(),
            url: url.into(),
            title: title.into(),
            visible_text,
            source: Box::new(self),
        }
    }
}
