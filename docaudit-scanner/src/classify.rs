//! Page classification: title cleanup, keyword counts, tags and missing-page
//! detection.
//!
//! A page is considered missing when its title is exactly the site's
//! not-found sentinel. This depends on the site's theme and locale; a title
//! change on the site silently disables detection.

use crate::result::{KeywordCounts, PageRecord};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

pub const NOT_FOUND_TITLE: &str = "Page Not Found";
pub const BREADCRUMB_SEPARATOR: char = '|';

pub const DEFAULT_KEYWORDS: &[&str] = &[
    "windows",
    "powershell",
    "bash",
    "curl",
    "gcloud",
    "unix socket",
    "tcp",
];

/// Elements whose text never reaches the reader.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("static selector is valid"));

/// A tag set on pages whose text contains every phrase in `all_of`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRule {
    pub name: String,
    pub all_of: Vec<String>,
}

impl TagRule {
    pub fn new(name: impl Into<String>, all_of: &[&str]) -> Self {
        Self {
            name: name.into(),
            all_of: all_of.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Pages documenting REST calls for both curl and PowerShell.
    pub fn dual_rest_api() -> Self {
        Self::new(
            "drest",
            &["curl (Linux, macOS, or Cloud Shell)", "PowerShell (Windows)"],
        )
    }

    fn matches(&self, text_lower: &str) -> bool {
        !self.all_of.is_empty()
            && self
                .all_of
                .iter()
                .all(|phrase| text_lower.contains(&phrase.to_lowercase()))
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    keywords: Vec<String>,
    tag_rules: Vec<TagRule>,
    not_found_title: String,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect())
    }
}

impl Classifier {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords,
            tag_rules: vec![TagRule::dual_rest_api()],
            not_found_title: NOT_FOUND_TITLE.to_string(),
        }
    }

    pub fn with_tag_rules(mut self, rules: Vec<TagRule>) -> Self {
        self.tag_rules = rules;
        self
    }

    pub fn with_not_found_title(mut self, title: impl Into<String>) -> Self {
        self.not_found_title = title.into();
        self
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.tag_rules.iter().map(|r| r.name.clone()).collect()
    }

    pub fn classify(&self, url: &Url, status_code: u16, document: &Html) -> PageRecord {
        let raw_title = match document.select(&TITLE_SELECTOR).next() {
            Some(title) => title.text().collect::<String>(),
            None => {
                debug!("No <title> on {}", url);
                String::new()
            }
        };

        let text = visible_text(document).to_lowercase();

        let mut keyword_counts = KeywordCounts::new();
        for keyword in &self.keywords {
            keyword_counts.set(keyword, count_keyword(&text, keyword));
        }

        let tags = self
            .tag_rules
            .iter()
            .filter(|rule| rule.matches(&text))
            .map(|rule| rule.name.clone())
            .collect();

        PageRecord {
            url: url.to_string(),
            status_code,
            title: page_title(&raw_title),
            not_found: raw_title.trim() == self.not_found_title,
            raw_title,
            keyword_counts,
            tags,
        }
    }
}

/// Strip a breadcrumb trail (`Page | Section | Product`) down to the page's
/// own title.
pub fn page_title(raw: &str) -> String {
    match raw.split_once(BREADCRUMB_SEPARATOR) {
        Some((first, _)) => first.trim().to_string(),
        None => raw.to_string(),
    }
}

/// Case-insensitive, non-overlapping occurrence count of `keyword` in text
/// that has already been lower-cased.
pub fn count_keyword(text_lower: &str, keyword: &str) -> usize {
    let keyword = keyword.to_lowercase();
    if keyword.is_empty() {
        return 0;
    }
    text_lower.matches(keyword.as_str()).count()
}

/// Concatenated text of the document, minus script and style content.
pub fn visible_text(document: &Html) -> String {
    let mut text = String::new();
    for node in document.tree.root().descendants() {
        let Some(fragment) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| HIDDEN_ELEMENTS.contains(&el.name()))
        });
        if !hidden {
            text.push_str(fragment);
        }
    }
    text
}

/// Whether a Content-Type header names an HTML document.
pub fn is_html_content_type(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| {
            let mime = ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
            mime == "text/html" || mime == "application/xhtml+xml"
        })
        .unwrap_or(false)
}
