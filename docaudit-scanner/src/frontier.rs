//! Breadth-first frontier owned by a single crawl run.

use crate::url_norm::identity_key;
use std::collections::{HashSet, VecDeque};
use url::Url;

/// Pending queue plus visited set.
///
/// Every URL is keyed by its scheme-insensitive identity. A URL is enqueued at
/// most once per run, and no more URLs are handed out once visited plus
/// in-flight pages reach the page limit.
#[derive(Debug)]
pub struct Frontier {
    pending: VecDeque<Url>,
    known: HashSet<String>,
    visited: HashSet<String>,
    in_flight: usize,
    page_limit: usize,
}

impl Frontier {
    pub fn new(seed: Url, page_limit: usize) -> Self {
        let mut frontier = Self {
            pending: VecDeque::new(),
            known: HashSet::new(),
            visited: HashSet::new(),
            in_flight: 0,
            page_limit,
        };
        frontier.offer(seed);
        frontier
    }

    /// Queue a URL unless an equivalent URL was already queued or visited.
    /// Returns whether the URL was newly queued.
    pub fn offer(&mut self, url: Url) -> bool {
        if !self.known.insert(identity_key(&url)) {
            return false;
        }
        self.pending.push_back(url);
        true
    }

    /// Next URL to fetch in FIFO order, or `None` when the queue is empty or
    /// the page limit leaves no room.
    pub fn next(&mut self) -> Option<Url> {
        if self.visited.len() + self.in_flight >= self.page_limit {
            return None;
        }
        let url = self.pending.pop_front()?;
        self.in_flight += 1;
        Some(url)
    }

    pub fn mark_visited(&mut self, url: &Url) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.visited.insert(identity_key(url));
    }

    /// The fetch failed. The URL stays known so it is not queued again.
    pub fn mark_failed(&mut self, _url: &Url) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn limit_reached(&self) -> bool {
        self.visited.len() >= self.page_limit
    }
}
