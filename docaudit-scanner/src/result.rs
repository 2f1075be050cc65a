use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keyword occurrence counts for a page. Only non-zero counts are stored, so
/// a keyword that never occurs is absent rather than `0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeywordCounts(BTreeMap<String, usize>);

impl KeywordCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, keyword: &str, count: usize) {
        if count == 0 {
            self.0.remove(keyword);
        } else {
            self.0.insert(keyword.to_string(), count);
        }
    }

    pub fn get(&self, keyword: &str) -> Option<usize> {
        self.0.get(keyword).copied()
    }

    /// Tabular rendering: the count, or an empty cell when the keyword is absent.
    pub fn cell(&self, keyword: &str) -> String {
        self.get(keyword).map(|c| c.to_string()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// One fetched and classified HTML page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub status_code: u16,
    /// Title with any breadcrumb suffix removed.
    pub title: String,
    pub raw_title: String,
    pub keyword_counts: KeywordCounts,
    pub tags: Vec<String>,
    pub not_found: bool,
}

impl PageRecord {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// A hyperlink observed on a crawled page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkEdge {
    pub source: String,
    pub target: String,
    pub anchor_text: String,
}

impl LinkEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, anchor_text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            anchor_text: anchor_text.into(),
        }
    }
}

/// One row of the broken-link report: a missing page and a page linking to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenLink {
    pub missing: String,
    pub linked_from: String,
    pub anchor_text: String,
}
