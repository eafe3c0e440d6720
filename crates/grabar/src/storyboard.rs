//! Storyboard data model: the declarative input the replay engine executes.
//!
//! A storyboard is an ordered list of scenes, each an ordered list of typed
//! actions. The action set is a closed tagged union; unknown kinds fail at
//! deserialization time instead of at replay time.

use serde::{Deserialize, Serialize};

use crate::locator::Locator;
use crate::result::{GrabarError, GrabarResult};

/// Scroll targets for the `scroll` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    /// One viewport up
    Up,
    /// One viewport down
    Down,
    /// Jump to the top of the page
    Top,
    /// Jump to the bottom of the page
    Bottom,
}

/// One step of a scene. The tagged representation keeps storyboards
/// readable as JSON while rejecting unknown action kinds outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Navigate to a URL, a site-relative path, or a described destination
    /// the navigation resolver maps to a crawled page.
    Navigate {
        /// URL, path, or natural-language destination
        value: String,
        /// Per-action deadline override in milliseconds
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        /// Free-text intent, consulted by the resolver
        #[serde(default)]
        description: String,
    },
    /// Click the element a locator refers to.
    Click {
        /// Element to click
        locator: Locator,
        /// Per-action deadline override in milliseconds
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        /// Free-text intent, for logs and traces
        #[serde(default)]
        description: String,
    },
    /// Type text into an input element.
    Type {
        /// Input element to fill
        locator: Locator,
        /// Text to enter
        value: String,
        /// Per-action deadline override in milliseconds
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        /// Free-text intent, for logs and traces
        #[serde(default)]
        description: String,
    },
    /// Pause for a fixed duration, capped by the replay configuration.
    Wait {
        /// Milliseconds to pause; the replay default applies when omitted
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        /// Free-text intent, for logs and traces
        #[serde(default)]
        description: String,
    },
    /// Assert that an element is visible and, when `value` is given,
    /// that its text contains the expected substring.
    Assert {
        /// Element to check
        locator: Locator,
        /// Expected text substring
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        /// Free-text intent, for logs and traces
        #[serde(default)]
        description: String,
    },
    /// Scroll the page.
    Scroll {
        /// Where to scroll
        value: ScrollDirection,
        /// Free-text intent, for logs and traces
        #[serde(default)]
        description: String,
    },
}

impl Action {
    /// Short label for logs, traces, and error context.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Navigate { value, .. } => format!("navigate to {value}"),
            Self::Click { locator, .. } => format!("click {}", locator.value),
            Self::Type { locator, .. } => format!("type into {}", locator.value),
            Self::Wait { duration_ms, .. } => match duration_ms {
                Some(ms) => format!("wait {ms}ms"),
                None => "wait".to_string(),
            },
            Self::Assert { locator, .. } => format!("assert {}", locator.value),
            Self::Scroll { value, .. } => format!("scroll {value:?}"),
        }
    }

    /// The locator this action targets, when it has one.
    #[must_use]
    pub fn locator(&self) -> Option<&Locator> {
        match self {
            Self::Click { locator, .. }
            | Self::Type { locator, .. }
            | Self::Assert { locator, .. } => Some(locator),
            Self::Navigate { .. } | Self::Wait { .. } | Self::Scroll { .. } => None,
        }
    }

    /// Per-action deadline override, when the storyboard sets one.
    #[must_use]
    pub fn timeout_override(&self) -> Option<u64> {
        match self {
            Self::Navigate { timeout_ms, .. }
            | Self::Click { timeout_ms, .. }
            | Self::Type { timeout_ms, .. } => *timeout_ms,
            Self::Wait { .. } | Self::Assert { .. } | Self::Scroll { .. } => None,
        }
    }

    fn validate(&self) -> GrabarResult<()> {
        if let Self::Navigate { value, .. } = self {
            if value.trim().is_empty() {
                return Err(GrabarError::InvalidStoryboard {
                    message: "navigate action has an empty target".to_string(),
                });
            }
        }
        if let Some(locator) = self.locator() {
            locator.validate()?;
        }
        Ok(())
    }
}

/// One scene: a titled, independently recorded unit of the storyboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Scene identifier, unique within the storyboard
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// What a reviewer should see when the scene succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
    /// Steps executed in order
    pub actions: Vec<Action>,
    /// CSS selectors blurred for this scene only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blur_selectors: Vec<String>,
}

/// A complete storyboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Storyboard {
    /// Storyboard name, for logs and artifacts
    pub name: String,
    /// Scenes executed in order, fail-fast
    pub scenes: Vec<Scene>,
    /// CSS selectors blurred in every scene
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blur_selectors: Vec<String>,
}

impl Storyboard {
    /// Parse a storyboard from JSON.
    pub fn from_json(json: &str) -> GrabarResult<Self> {
        let storyboard: Self = serde_json::from_str(json)?;
        storyboard.validate()?;
        Ok(storyboard)
    }

    /// Structural validation: at least one scene, unique scene ids, no
    /// empty action lists, valid locators throughout.
    pub fn validate(&self) -> GrabarResult<()> {
        if self.scenes.is_empty() {
            return Err(GrabarError::InvalidStoryboard {
                message: format!("storyboard '{}' has no scenes", self.name),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for scene in &self.scenes {
            if scene.id.trim().is_empty() {
                return Err(GrabarError::InvalidStoryboard {
                    message: "scene with an empty id".to_string(),
                });
            }
            if !seen.insert(scene.id.as_str()) {
                return Err(GrabarError::InvalidStoryboard {
                    message: format!("duplicate scene id '{}'", scene.id),
                });
            }
            if scene.actions.is_empty() {
                return Err(GrabarError::InvalidStoryboard {
                    message: format!("scene '{}' has no actions", scene.id),
                });
            }
            for action in &scene.actions {
                action.validate().map_err(|e| GrabarError::InvalidStoryboard {
                    message: format!("scene '{}': {e}", scene.id),
                })?;
            }
        }
        Ok(())
    }

    /// Blur selectors in effect for one scene: storyboard-level first,
    /// then scene-level additions.
    #[must_use]
    pub fn blur_selectors_for(&self, scene: &Scene) -> Vec<String> {
        let mut out = self.blur_selectors.clone();
        out.extend(scene.blur_selectors.iter().cloned());
        out
    }
}

/// Outcome of one successfully recorded scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingResult {
    /// Scene id this result belongs to
    pub scene_id: String,
    /// Storage-relative path to the scene video
    pub video_path: String,
    /// Storage-relative path to the trace archive
    pub trace_path: String,
    /// Whether every action of the scene completed
    pub success: bool,
    /// Error message when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Retries consumed; scenes are not retried, so always zero
    pub retry_count: u32,
    /// Wall-clock scene duration in milliseconds
    pub duration_ms: u64,
}
