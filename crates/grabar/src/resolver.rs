//! Navigation resolver.
//!
//! Storyboard navigation targets range from absolute URLs to loose intent
//! like "the pricing page". Resolution runs a fixed strategy chain over the
//! crawl map and either produces one absolute URL or fails with the list of
//! paths that were actually available. The chain is pure: same inputs, same
//! answer, no network.

use url::Url;

use crate::crawler::{canonicalize_url, CrawlMap, CrawledPage};
use crate::locator::PageElement;
use crate::result::{GrabarError, GrabarResult};

/// Intent keywords mapped to the path fragments that satisfy them, tried in
/// table order. First match wins.
pub const NAV_KEYWORDS: &[(&str, &[&str])] = &[
    ("pricing", &["pricing", "plans"]),
    ("price", &["pricing", "plans"]),
    ("plans", &["pricing", "plans"]),
    ("blog", &["blog", "news", "posts"]),
    ("documentation", &["docs", "documentation"]),
    ("docs", &["docs", "documentation", "guide"]),
    ("getting started", &["start", "onboarding", "docs"]),
    ("get started", &["start", "onboarding", "signup"]),
    ("sign up", &["signup", "sign-up", "register"]),
    ("register", &["signup", "register"]),
    ("sign in", &["login", "signin", "sign-in"]),
    ("login", &["login", "signin", "auth"]),
    ("about", &["about", "team", "company"]),
    ("dashboard", &["dashboard", "app"]),
    ("settings", &["settings", "preferences", "account"]),
    ("home", &["/"]),
];

/// Filler words ignored by the fuzzy token strategy.
const STOPWORDS: &[&str] = &[
    "the", "page", "open", "goto", "go", "to", "navigate", "visit", "view", "show", "section",
];

/// Resolve a navigation target to one absolute URL.
///
/// Strategy chain, first hit wins:
/// 1. absolute URL, canonicalized
/// 2. site-relative path or bare value joined onto `base_url`, only when no
///    crawl preceded replay
/// 3. exact path or title match in the crawl map
/// 4. [`NAV_KEYWORDS`] intent lookup against crawled paths
/// 5. fuzzy token containment against crawled paths
/// 6. [`GrabarError::NavigationUnresolved`] carrying every available path
///
/// Once a map with pages exists, every non-absolute target must resolve
/// through it. A site-relative path the crawl never saw is a hard failure,
/// not a join; guessing here would mask storyboard/crawl inconsistencies.
pub fn resolve_navigation(
    value: &str,
    description: Option<&str>,
    base_url: &str,
    map: Option<&CrawlMap>,
) -> GrabarResult<String> {
    let value = value.trim();

    if value.starts_with("http://") || value.starts_with("https://") {
        return canonicalize_url(value);
    }

    let Some(map) = map.filter(|m| !m.pages.is_empty()) else {
        return join_onto(base_url, value);
    };

    if value.starts_with('/') {
        if let Some(page) = map.page_for_path(value) {
            return Ok(page.url.clone());
        }
    } else if let Some(url) = resolve_in_map(value, description, map) {
        return Ok(url);
    }

    Err(GrabarError::NavigationUnresolved {
        target: value.to_string(),
        description: description.unwrap_or_default().to_string(),
        available_paths: map.paths(),
    })
}

fn join_onto(base_url: &str, value: &str) -> GrabarResult<String> {
    let base = Url::parse(base_url).map_err(|e| GrabarError::NavigationError {
        url: base_url.to_string(),
        message: e.to_string(),
    })?;
    let joined = base.join(value).map_err(|e| GrabarError::NavigationError {
        url: value.to_string(),
        message: e.to_string(),
    })?;
    canonicalize_url(joined.as_str())
}

fn resolve_in_map(value: &str, description: Option<&str>, map: &CrawlMap) -> Option<String> {
    if let Some(page) = exact_match(value, map) {
        return Some(page.url.clone());
    }
    let haystack = format!(
        "{} {}",
        value.to_lowercase(),
        description.unwrap_or_default().to_lowercase()
    );
    if let Some(page) = keyword_match(&haystack, map) {
        return Some(page.url.clone());
    }
    if let Some(page) = token_match(&haystack, map) {
        return Some(page.url.clone());
    }
    // "Get started" flavored intent with no matching path still deserves a
    // guess: the first page discovered past the start page.
    if haystack.contains("start") {
        return map
            .pages
            .iter()
            .find(|p| p.path.trim_end_matches('/') != "")
            .map(|p| p.url.clone());
    }
    None
}

fn exact_match<'a>(value: &str, map: &'a CrawlMap) -> Option<&'a CrawledPage> {
    let slug = value
        .to_lowercase()
        .replace([' ', '_'], "-");
    let candidate = format!("/{}", slug.trim_matches('-'));
    map.page_for_path(&candidate)
        .or_else(|| {
            map.pages
                .iter()
                .find(|p| p.title.eq_ignore_ascii_case(value))
        })
}

fn keyword_match<'a>(haystack: &str, map: &'a CrawlMap) -> Option<&'a CrawledPage> {
    for (keyword, fragments) in NAV_KEYWORDS {
        if !haystack.contains(keyword) {
            continue;
        }
        for fragment in *fragments {
            let hit = if *fragment == "/" {
                map.page_for_path("/")
            } else {
                map.pages
                    .iter()
                    .find(|p| p.path.to_lowercase().contains(fragment))
            };
            if hit.is_some() {
                return hit;
            }
        }
    }
    None
}

fn token_match<'a>(haystack: &str, map: &'a CrawlMap) -> Option<&'a CrawledPage> {
    let tokens: Vec<&str> = haystack
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t))
        .collect();
    for page in &map.pages {
        let segments = page
            .path
            .split('/')
            .filter(|s| s.len() >= 3)
            .map(str::to_lowercase);
        for segment in segments {
            if tokens
                .iter()
                .any(|t| segment.contains(t) || t.contains(segment.as_str()))
            {
                return Some(page);
            }
        }
    }
    None
}

/// Find the crawled element a locator's text refers to on one page: exact
/// text match first, then substring containment.
#[must_use]
pub fn resolve_element<'a>(page: &'a CrawledPage, target_text: &str) -> Option<&'a PageElement> {
    let clickable = || {
        page.elements
            .iter()
            .filter(|e| e.kind.is_clickable())
    };
    clickable()
        .find(|e| e.text.as_deref().is_some_and(|t| t.trim() == target_text))
        .or_else(|| {
            clickable().find(|e| {
                e.text
                    .as_deref()
                    .is_some_and(|t| t.contains(target_text) || target_text.contains(t.trim()))
            })
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crawler::CrawledPage;
    use crate::locator::{ElementKind, Locator};
    use chrono::Utc;

    const BASE: &str = "https://site.test/";

    fn page(path: &str, title: &str) -> CrawledPage {
        let url = if path == "/" {
            "https://site.test/".to_string()
        } else {
            format!("https://site.test{path}")
        };
        CrawledPage {
            url,
            path: path.to_string(),
            title: title.to_string(),
            depth: 0,
            crawled_at: Utc::now(),
            elements: vec![],
        }
    }

    fn map_of(pages: Vec<CrawledPage>) -> CrawlMap {
        CrawlMap {
            base_url: BASE.to_string(),
            origin: "https://site.test".to_string(),
            crawled_at: Utc::now(),
            total_pages: pages.len(),
            max_depth: 3,
            crawl_duration_ms: 0,
            pages,
        }
    }

    fn demo_map() -> CrawlMap {
        map_of(vec![
            page("/", "Home"),
            page("/pricing", "Pricing"),
            page("/blog", "Blog"),
            page("/docs/quickstart", "Quickstart"),
        ])
    }

    mod direct_tests {
        use super::*;

        #[test]
        fn test_absolute_url_passes_through_canonicalized() {
            let url =
                resolve_navigation("https://other.test/x#frag", None, BASE, None).unwrap();
            assert_eq!(url, "https://other.test/x");
        }

        #[test]
        fn test_relative_path_joined_to_base() {
            let url = resolve_navigation("/pricing", None, BASE, None).unwrap();
            assert_eq!(url, "https://site.test/pricing");
        }
    }

    mod map_tests {
        use super::*;

        #[test]
        fn test_exact_path_match() {
            let map = demo_map();
            let url = resolve_navigation("pricing", None, BASE, Some(&map)).unwrap();
            assert_eq!(url, "https://site.test/pricing");
        }

        #[test]
        fn test_title_match() {
            let map = demo_map();
            let url = resolve_navigation("Quickstart", None, BASE, Some(&map)).unwrap();
            assert_eq!(url, "https://site.test/docs/quickstart");
        }

        #[test]
        fn test_keyword_match_via_description() {
            let map = demo_map();
            let url = resolve_navigation(
                "first steps",
                Some("open the getting started guide"),
                BASE,
                Some(&map),
            )
            .unwrap();
            assert_eq!(url, "https://site.test/docs/quickstart");
        }

        #[test]
        fn test_token_containment_match() {
            let map = demo_map();
            let url =
                resolve_navigation("quickstart guide", None, BASE, Some(&map)).unwrap();
            assert_eq!(url, "https://site.test/docs/quickstart");
        }

        #[test]
        fn test_unresolved_lists_available_paths() {
            let map = demo_map();
            let err = resolve_navigation(
                "contact page",
                Some("reach the contact form"),
                BASE,
                Some(&map),
            )
            .unwrap_err();
            match err {
                GrabarError::NavigationUnresolved {
                    target,
                    available_paths,
                    ..
                } => {
                    assert_eq!(target, "contact page");
                    assert!(available_paths.contains(&"/pricing".to_string()));
                    assert!(available_paths.contains(&"/blog".to_string()));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn test_uncrawled_path_is_unresolved_with_map() {
            let map = map_of(vec![page("/", "Home"), page("/reach-us", "Get In Touch")]);
            let err = resolve_navigation(
                "/contact",
                Some("open the contact form"),
                BASE,
                Some(&map),
            )
            .unwrap_err();
            match err {
                GrabarError::NavigationUnresolved {
                    target,
                    available_paths,
                    ..
                } => {
                    assert_eq!(target, "/contact");
                    assert!(available_paths.contains(&"/reach-us".to_string()));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn test_crawled_path_resolves_through_map() {
            let map = demo_map();
            let url = resolve_navigation("/pricing", None, BASE, Some(&map)).unwrap();
            assert_eq!(url, "https://site.test/pricing");
        }

        #[test]
        fn test_without_map_bare_value_joins_onto_base() {
            let url = resolve_navigation("pricing", None, BASE, None).unwrap();
            assert_eq!(url, "https://site.test/pricing");
        }

        #[test]
        fn test_empty_map_behaves_like_no_map() {
            let map = map_of(vec![]);
            let url = resolve_navigation("pricing", None, BASE, Some(&map)).unwrap();
            assert_eq!(url, "https://site.test/pricing");
        }

        #[test]
        fn test_unfamiliar_wording_is_unresolved() {
            // The crawl found the page under a path and title that share no
            // vocabulary with the request.
            let map = map_of(vec![page("/", "Home"), page("/reach-us", "Get In Touch")]);
            let err = resolve_navigation(
                "contact page",
                Some("open the contact form"),
                BASE,
                Some(&map),
            )
            .unwrap_err();
            match err {
                GrabarError::NavigationUnresolved { available_paths, .. } => {
                    assert!(available_paths.contains(&"/reach-us".to_string()));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn test_start_intent_falls_back_to_first_inner_page() {
            let map = map_of(vec![page("/", "Home"), page("/features", "Features")]);
            let url = resolve_navigation(
                "onward",
                Some("get started with the product"),
                BASE,
                Some(&map),
            )
            .unwrap();
            assert_eq!(url, "https://site.test/features");
        }

        #[test]
        fn test_resolution_is_deterministic() {
            let map = demo_map();
            let first =
                resolve_navigation("blog", Some("news section"), BASE, Some(&map)).unwrap();
            let second =
                resolve_navigation("blog", Some("news section"), BASE, Some(&map)).unwrap();
            assert_eq!(first, second);
        }
    }

    mod element_tests {
        use super::*;

        fn page_with_buttons() -> CrawledPage {
            let mut p = page("/", "Home");
            p.elements = vec![
                crate::locator::PageElement {
                    kind: ElementKind::Button,
                    text: Some("Get started free".to_string()),
                    url: None,
                    locator: Locator::role("button", "Get started free"),
                },
                crate::locator::PageElement {
                    kind: ElementKind::Button,
                    text: Some("Start".to_string()),
                    url: None,
                    locator: Locator::role("button", "Start"),
                },
                crate::locator::PageElement {
                    kind: ElementKind::Heading,
                    text: Some("Start here".to_string()),
                    url: None,
                    locator: Locator::text("Start here"),
                },
            ];
            p
        }

        #[test]
        fn test_exact_text_beats_substring() {
            let p = page_with_buttons();
            let hit = resolve_element(&p, "Start").unwrap();
            assert_eq!(hit.text.as_deref(), Some("Start"));
        }

        #[test]
        fn test_substring_fallback() {
            let p = page_with_buttons();
            let hit = resolve_element(&p, "Get started").unwrap();
            assert_eq!(hit.text.as_deref(), Some("Get started free"));
        }

        #[test]
        fn test_headings_never_resolved() {
            let p = page_with_buttons();
            // "Start here" names a heading; resolution lands on the
            // clickable "Start" button instead.
            let hit = resolve_element(&p, "Start here").unwrap();
            assert!(hit.kind.is_clickable());
            assert_eq!(hit.text.as_deref(), Some("Start"));
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_relative_paths_resolve_idempotently(
                segment in "[a-z][a-z0-9]{1,10}"
            ) {
                let path = format!("/{segment}");
                let first = resolve_navigation(&path, None, BASE, None).unwrap();
                let second = resolve_navigation(&first, None, BASE, None).unwrap();
                prop_assert_eq!(first, second);
            }

            #[test]
            fn prop_resolution_never_leaves_origin_for_relative_paths(
                segment in "[a-z][a-z0-9]{1,10}"
            ) {
                let url = resolve_navigation(&format!("/{segment}"), None, BASE, None).unwrap();
                prop_assert!(url.starts_with("https://site.test/"));
            }
        }
    }
}
