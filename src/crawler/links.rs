//! Link extraction
//!
//! Rules, applied in order to every `<a href>`:
//! - resolve against the page URL
//! - drop `#...`, `javascript:`, `mailto:`, `tel:` and `data:` targets and
//!   anything that is not http(s) after resolution
//! - drop links to another domain (host and explicit port must match)
//! - strip the fragment
//! - if a link pattern is configured, keep only links whose path matches it
//!
//! The result is de-duplicated, preserving document order.

use crate::url::{same_domain, strip_fragment, LinkPattern};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

/// Extracts the crawlable links of a page
///
/// # Example
///
/// ```
/// use harvester::crawler::extract_links;
/// use url::Url;
///
/// let html = r#"<a href="/p/1#reviews">One</a> <a href="https://other.com/">Away</a>"#;
/// let base = Url::parse("https://shop.example.com/").unwrap();
/// let links = extract_links(html, &base, None);
/// assert_eq!(links, vec![Url::parse("https://shop.example.com/p/1").unwrap()]);
/// ```
pub fn extract_links(html: &str, base_url: &Url, pattern: Option<&LinkPattern>) -> Vec<Url> {
    static ANCHOR: OnceLock<Selector> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(|| Selector::parse("a[href]").expect("valid anchor selector"));

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(anchor) {
        // Skip if it has the download attribute
        if element.value().attr("download").is_some() {
            continue;
        }

        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(url) = resolve_link(href, base_url) else {
            continue;
        };

        if !same_domain(&url, base_url) {
            continue;
        }
        if let Some(pattern) = pattern {
            if !pattern.matches(url.path()) {
                continue;
            }
        }

        if seen.insert(url.as_str().to_string()) {
            links.push(url);
        }
    }

    links
}

/// Resolves a link href to an absolute, fragment-free http(s) URL
///
/// Returns None if the link should be excluded.
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut url = base_url.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    strip_fragment(&mut url);
    Some(url)
}
