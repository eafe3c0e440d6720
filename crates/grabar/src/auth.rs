//! Session authentication.
//!
//! Both engines authenticate a fresh context the same way before doing any
//! real work: install cookies, or drive a short scripted login. Magic-link
//! flows need an out-of-band inbox and are rejected up front.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::driver::PageHandle;
use crate::result::{GrabarError, GrabarResult};
use crate::storyboard::Action;

/// One cookie to install into a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Cookie domain
    pub domain: String,
    /// Cookie path
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// Secure flag
    #[serde(default)]
    pub secure: bool,
    /// HttpOnly flag
    #[serde(default)]
    pub http_only: bool,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// How a job authenticates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Install session cookies directly.
    Cookies {
        /// Cookies to set
        cookies: Vec<Cookie>,
    },
    /// Drive a scripted login form.
    Login {
        /// Login page, absolute or site-relative
        login_url: String,
        /// Steps to perform on the login page
        actions: Vec<Action>,
    },
    /// Email magic-link login. Not executable without an inbox.
    MagicLink,
}

/// Authenticates a freshly opened page before crawl or replay begins.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Run the configured flow on `page`. `base_url` resolves relative
    /// login paths.
    async fn authenticate(
        &self,
        page: &dyn PageHandle,
        base_url: &str,
        config: &AuthConfig,
    ) -> GrabarResult<()>;
}

/// Default implementation of the supported flows.
#[derive(Debug, Clone)]
pub struct DefaultAuthenticator {
    /// Deadline for each navigation or form interaction
    pub action_timeout: Duration,
}

impl Default for DefaultAuthenticator {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(10),
        }
    }
}

impl DefaultAuthenticator {
    fn resolve_url(base_url: &str, target: &str) -> GrabarResult<String> {
        if target.starts_with("http://") || target.starts_with("https://") {
            return Ok(target.to_string());
        }
        let base = url::Url::parse(base_url).map_err(|e| GrabarError::AuthenticationFailed {
            message: format!("invalid base url '{base_url}': {e}"),
        })?;
        let joined = base.join(target).map_err(|e| GrabarError::AuthenticationFailed {
            message: format!("invalid login url '{target}': {e}"),
        })?;
        Ok(joined.to_string())
    }

    /// Login steps use the primary locator query only. The full fallback
    /// ladder belongs to scene replay; a login form that needs it is a
    /// storyboard bug, not something to paper over.
    async fn run_login_action(
        &self,
        page: &dyn PageHandle,
        base_url: &str,
        action: &Action,
    ) -> GrabarResult<()> {
        match action {
            Action::Navigate { value, .. } => {
                let url = Self::resolve_url(base_url, value)?;
                page.goto(&url, self.action_timeout).await
            }
            Action::Click { locator, .. } => {
                page.click(&locator.primary_query(), self.action_timeout).await
            }
            Action::Type { locator, value, .. } => {
                page.fill(&locator.primary_query(), value, self.action_timeout)
                    .await
            }
            Action::Wait { duration_ms, .. } => {
                tokio::time::sleep(Duration::from_millis(duration_ms.unwrap_or(500))).await;
                Ok(())
            }
            Action::Assert { locator, .. } => {
                if page
                    .is_visible(&locator.primary_query(), self.action_timeout)
                    .await?
                {
                    Ok(())
                } else {
                    Err(GrabarError::ElementNotFound {
                        target: locator.value.clone(),
                    })
                }
            }
            Action::Scroll { value, .. } => page.scroll(*value).await,
        }
    }
}

#[async_trait]
impl Authenticator for DefaultAuthenticator {
    async fn authenticate(
        &self,
        page: &dyn PageHandle,
        base_url: &str,
        config: &AuthConfig,
    ) -> GrabarResult<()> {
        match config {
            AuthConfig::Cookies { cookies } => {
                // Cookies only apply once the context has an origin.
                page.goto(base_url, self.action_timeout).await?;
                page.set_cookies(cookies).await?;
                tracing::debug!(count = cookies.len(), "installed session cookies");
                Ok(())
            }
            AuthConfig::Login { login_url, actions } => {
                let url = Self::resolve_url(base_url, login_url)?;
                page.goto(&url, self.action_timeout).await.map_err(|e| {
                    GrabarError::AuthenticationFailed {
                        message: format!("login page unreachable: {e}"),
                    }
                })?;
                for action in actions {
                    self.run_login_action(page, base_url, action)
                        .await
                        .map_err(|e| GrabarError::AuthenticationFailed {
                            message: format!("login step '{}' failed: {e}", action.describe()),
                        })?;
                }
                tracing::debug!(steps = actions.len(), "scripted login completed");
                Ok(())
            }
            AuthConfig::MagicLink => Err(GrabarError::Unsupported {
                message: "magic-link authentication requires an external inbox".to_string(),
            }),
        }
    }
}
