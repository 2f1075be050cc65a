//! Hyperlink extraction from parsed pages.
//!
//! Extraction does not consult the scope filter; callers decide which of the
//! returned targets to follow.

use crate::url_norm::normalize;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    pub target: Url,
    pub anchor_text: String,
}

/// Every distinct link target on the page, in document order, with the anchor
/// text of its first occurrence.
pub fn extract_links(document: &Html, page_url: &Url) -> Vec<ExtractedLink> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&LINK_SELECTOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(target) = normalize(page_url, href) else {
            continue;
        };
        if !seen.insert(target.as_str().to_string()) {
            continue;
        }

        links.push(ExtractedLink {
            target,
            anchor_text: anchor_text(&element),
        });
    }

    links
}

fn anchor_text(element: &ElementRef) -> String {
    let text = element.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if !text.is_empty() {
        return text;
    }
    element
        .value()
        .attr("title")
        .or_else(|| element.value().attr("aria-label"))
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}
