//! Locator and page-element model shared by the crawl and replay engines.
//!
//! A [`Locator`] is an immutable, serializable reference to one UI element:
//! a kind, a value, and an ordered list of fallback selector strings tried in
//! sequence when the primary lookup fails. Locators are synthesized once by
//! the crawl engine and consumed, unmodified, by the replay engine.
//!
//! [`Query`] is the runtime form handed to a page driver: a closed set of
//! lookup strategies each driver knows how to execute.

use serde::{Deserialize, Serialize};

use crate::result::{GrabarError, GrabarResult};

/// The closed set of locator strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocatorKind {
    /// Accessible role plus name, encoded as `role:name` in `value`
    Role,
    /// Visible text content
    Text,
    /// Stable element id, preferred whenever present
    TestId,
    /// Raw CSS selector
    Selector,
}

/// A typed reference to a UI element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    /// Lookup strategy
    pub kind: LocatorKind,
    /// Strategy-specific value; never empty for a valid locator
    pub value: String,
    /// Fallback selector strings tried in order when the primary fails.
    /// Raw CSS, or `text=...` for a text lookup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<String>,
}

impl Locator {
    /// Locator keyed on a stable element id.
    #[must_use]
    pub fn test_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let fallbacks = vec![format!("#{id}")];
        Self {
            kind: LocatorKind::TestId,
            value: id,
            fallbacks,
        }
    }

    /// Role-based locator (`button`, `link`, ...) with an accessible name.
    #[must_use]
    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        let role = role.into();
        let name = name.into();
        let fallbacks = vec![format!("text={name}")];
        Self {
            kind: LocatorKind::Role,
            value: format!("{role}:{name}"),
            fallbacks,
        }
    }

    /// Text-content locator.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: LocatorKind::Text,
            value: text.into(),
            fallbacks: Vec::new(),
        }
    }

    /// Raw CSS selector locator.
    #[must_use]
    pub fn selector(css: impl Into<String>) -> Self {
        Self {
            kind: LocatorKind::Selector,
            value: css.into(),
            fallbacks: Vec::new(),
        }
    }

    /// Append a fallback selector string.
    #[must_use]
    pub fn with_fallback(mut self, selector: impl Into<String>) -> Self {
        self.fallbacks.push(selector.into());
        self
    }

    /// Synthesize a locator for a crawled element, applying the priority
    /// rule: stable id first, then role-with-name for interactive elements,
    /// then bare text. Returns `None` when the element carries no signal a
    /// replay could act on.
    #[must_use]
    pub fn for_element(kind: ElementKind, text: Option<&str>, id: Option<&str>) -> Option<Self> {
        let text = text.map(str::trim).filter(|t| !t.is_empty());
        let id = id.map(str::trim).filter(|i| !i.is_empty());

        if let Some(id) = id {
            let mut locator = Self::test_id(id);
            if let Some(text) = text {
                locator.fallbacks.push(format!("text={text}"));
            }
            return Some(locator);
        }

        let text = text?;
        match kind {
            ElementKind::Button => Some(Self::role("button", text)),
            ElementKind::Link | ElementKind::Nav => Some(Self::role("link", text)),
            _ => Some(Self::text(text)),
        }
    }

    /// The primary lookup for this locator.
    #[must_use]
    pub fn primary_query(&self) -> Query {
        match self.kind {
            LocatorKind::TestId => Query::Css(format!("[data-testid=\"{}\"]", self.value)),
            LocatorKind::Selector => Query::Css(self.value.clone()),
            LocatorKind::Text => Query::Text {
                text: self.value.clone(),
                exact: false,
            },
            LocatorKind::Role => {
                let (role, name) = self.split_role_value();
                Query::Role {
                    role: role.to_string(),
                    text: name.to_string(),
                }
            }
        }
    }

    /// Primary query followed by every fallback, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<Query> {
        let mut out = vec![self.primary_query()];
        out.extend(self.fallbacks.iter().map(|s| Query::parse(s)));
        out
    }

    /// The human-meaningful text behind this locator, if it has one. Used by
    /// the replay engine as the target for text-based strategies.
    #[must_use]
    pub fn target_text(&self) -> Option<&str> {
        match self.kind {
            LocatorKind::Text => Some(&self.value),
            LocatorKind::Role => {
                let (_, name) = self.split_role_value();
                if name.is_empty() {
                    None
                } else {
                    Some(name)
                }
            }
            LocatorKind::TestId | LocatorKind::Selector => None,
        }
    }

    /// Reject locators with an empty value.
    pub fn validate(&self) -> GrabarResult<()> {
        if self.value.trim().is_empty() {
            return Err(GrabarError::InvalidStoryboard {
                message: format!("locator of kind {:?} has an empty value", self.kind),
            });
        }
        Ok(())
    }

    fn split_role_value(&self) -> (&str, &str) {
        match self.value.split_once(':') {
            Some((role, name)) => (role, name),
            None => (self.value.as_str(), ""),
        }
    }
}

/// A single lookup strategy a page driver can execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// CSS selector
    Css(String),
    /// Text content match
    Text {
        /// Text to match
        text: String,
        /// Require whole-text equality instead of containment
        exact: bool,
    },
    /// Element with a given role (tag or `role` attribute) containing text
    Role {
        /// Role name (`button`, `link`, ...)
        role: String,
        /// Text the element must contain
        text: String,
    },
}

impl Query {
    /// Parse a fallback selector string: `text=...` becomes a text lookup,
    /// anything else is raw CSS.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        s.strip_prefix("text=").map_or_else(
            || Self::Css(s.to_string()),
            |text| Self::Text {
                text: text.to_string(),
                exact: false,
            },
        )
    }

    /// Exact-text lookup.
    #[must_use]
    pub fn text_exact(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            exact: true,
        }
    }

    /// Short label for logging and error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Css(css) => format!("css:{css}"),
            Self::Text { text, exact: true } => format!("text(exact):{text}"),
            Self::Text { text, exact: false } => format!("text:{text}"),
            Self::Role { role, text } => format!("role:{role}:{text}"),
        }
    }

    /// Render as a JavaScript expression returning the first matching
    /// element, for CDP-backed drivers.
    #[must_use]
    pub fn to_js(&self) -> String {
        match self {
            Self::Css(css) => format!("document.querySelector({})", js_string(css)),
            Self::Text { text, exact } => {
                let matcher = if *exact {
                    format!("el.textContent.trim() === {}", js_string(text))
                } else {
                    format!("el.textContent.includes({})", js_string(text))
                };
                format!(
                    "Array.from(document.querySelectorAll('a, button, [role], h1, h2, h3, label, span, p')).find(el => {matcher})"
                )
            }
            Self::Role { role, text } => {
                let tag = match role.as_str() {
                    "link" => "a",
                    other => other,
                };
                format!(
                    "Array.from(document.querySelectorAll({})).find(el => el.textContent.includes({}))",
                    js_string(&format!("{tag}, [role=\"{role}\"]")),
                    js_string(text)
                )
            }
        }
    }
}

/// Escape a string as a JavaScript literal.
#[must_use]
pub fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

/// The closed set of element kinds the crawler extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    /// `h1`-`h3` headings (structural anchors, never clicked)
    Heading,
    /// Links inside a `nav` landmark
    Nav,
    /// Buttons and submit inputs
    Button,
    /// Plain anchors
    Link,
    /// Form containers
    Form,
    /// Text inputs, textareas, selects
    Input,
}

impl ElementKind {
    /// Whether replay may click this kind of element.
    #[must_use]
    pub const fn is_clickable(self) -> bool {
        matches!(self, Self::Nav | Self::Button | Self::Link)
    }
}

/// One interactive or structural unit found on a crawled page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageElement {
    /// What kind of element this is
    pub kind: ElementKind,
    /// Display text, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Absolute target URL for links and nav entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// How replay finds this element again
    pub locator: Locator,
}
