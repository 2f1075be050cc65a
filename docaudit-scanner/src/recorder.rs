//! Lifecycle and accounting for one crawl run.
//!
//! A recorder is owned by exactly one crawl loop. Once the run leaves the
//! `Running` state every further record call is ignored, so work that
//! finishes after an abort cannot change the run.

use crate::classify::Classifier;
use crate::error::{FetchError, PersistenceError};
use crate::result::{BrokenLink, LinkEdge, PageRecord};
use crate::url_norm::identity_key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Aborted,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(RunState::Idle),
            "running" => Some(RunState::Running),
            "completed" => Some(RunState::Completed),
            "aborted" => Some(RunState::Aborted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Distinct in-scope URLs discovered beyond the seed.
    pub links: usize,
    /// Pages fetched and marked visited, HTML or not.
    pub pages: usize,
    /// Pages classified as not found.
    pub missing: usize,
    /// Fetches that failed outright.
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlJobRun {
    pub run_id: String,
    pub job_type: String,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_ms: Option<i64>,
    pub counts: RunCounts,
    pub state: RunState,
    /// Keywords counted on every page of this run, in column order.
    pub keywords: Vec<String>,
    /// Tag rule names applied by this run.
    pub tags: Vec<String>,
}

/// Run history and page/edge log. Implementations must treat every value as
/// data; URLs and titles are untrusted page content.
pub trait RunStore {
    fn create_run(&self, run: &CrawlJobRun) -> Result<(), PersistenceError>;
    fn append_page(&self, run_id: &str, page: &PageRecord) -> Result<(), PersistenceError>;
    fn append_edge(&self, run_id: &str, edge: &LinkEdge) -> Result<(), PersistenceError>;
    fn append_missing(&self, run_id: &str, url: &str) -> Result<(), PersistenceError>;
    /// Counters of a run that is still in progress.
    fn update_counts(&self, run: &CrawlJobRun) -> Result<(), PersistenceError>;
    fn finish_run(&self, run: &CrawlJobRun) -> Result<(), PersistenceError>;
}

/// Final state of a run, handed to the output collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJobRunSummary {
    pub run: CrawlJobRun,
    pub pages: Vec<PageRecord>,
    pub broken_links: Vec<BrokenLink>,
    /// False when any write to the run store failed.
    pub persisted: bool,
}

impl CrawlJobRunSummary {
    pub fn completed(&self) -> bool {
        self.run.state == RunState::Completed
    }
}

pub struct JobRunRecorder<'s> {
    run: CrawlJobRun,
    store: Option<&'s dyn RunStore>,
    pages: Vec<PageRecord>,
    edges: Vec<LinkEdge>,
    missing: Vec<String>,
    missing_keys: HashSet<String>,
    persistence_failures: usize,
}

impl<'s> JobRunRecorder<'s> {
    /// Start a run. The run row is written to the store before anything else;
    /// if that fails the run never starts.
    pub fn begin(
        job_type: &str,
        classifier: &Classifier,
        queued_at: Option<DateTime<Utc>>,
        store: Option<&'s dyn RunStore>,
    ) -> Result<Self, PersistenceError> {
        let mut run = CrawlJobRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            job_type: job_type.to_string(),
            queued_at,
            started_at: Utc::now(),
            ended_at: None,
            elapsed_ms: None,
            counts: RunCounts::default(),
            state: RunState::Idle,
            keywords: classifier.keywords().to_vec(),
            tags: classifier.tag_names(),
        };
        run.state = RunState::Running;

        if let Some(store) = store {
            store.create_run(&run)?;
        }

        Ok(Self {
            run,
            store,
            pages: Vec::new(),
            edges: Vec::new(),
            missing: Vec::new(),
            missing_keys: HashSet::new(),
            persistence_failures: 0,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    pub fn is_running(&self) -> bool {
        self.run.state == RunState::Running
    }

    /// A page was fetched. `record` is `None` for non-HTML leaves.
    pub fn record_page(&mut self, url: &Url, record: Option<PageRecord>) {
        if !self.accepting("page", url.as_str()) {
            return;
        }
        self.run.counts.pages += 1;

        if let Some(record) = record {
            if let Some(store) = self.store {
                let result = store.append_page(&self.run.run_id, &record);
                self.note(result);
            }
            self.pages.push(record);
        }

        if let Some(store) = self.store {
            let result = store.update_counts(&self.run);
            self.note(result);
        }
    }

    /// An in-scope link was seen. `discovered` marks the first sighting of its
    /// target in this run.
    pub fn record_link(&mut self, edge: LinkEdge, discovered: bool) {
        if !self.accepting("link", &edge.target) {
            return;
        }
        if discovered {
            self.run.counts.links += 1;
        }
        if let Some(store) = self.store {
            let result = store.append_edge(&self.run.run_id, &edge);
            self.note(result);
        }
        self.edges.push(edge);
    }

    pub fn record_missing(&mut self, url: &Url) {
        if !self.accepting("missing page", url.as_str()) {
            return;
        }
        if !self.missing_keys.insert(identity_key(url)) {
            return;
        }
        self.run.counts.missing += 1;
        self.missing.push(url.to_string());

        if let Some(store) = self.store {
            let result = store.append_missing(&self.run.run_id, url.as_str());
            self.note(result);
        }
    }

    pub fn record_failure(&mut self, url: &Url, error: &FetchError) {
        if !self.accepting("failure", url.as_str()) {
            return;
        }
        debug!("Recording failed fetch of {}: {}", url, error);
        self.run.counts.failed += 1;
    }

    /// Stop the run early. Counts are frozen as of this call.
    pub fn abort(&mut self) {
        if self.run.state == RunState::Running {
            self.run.state = RunState::Aborted;
        }
    }

    pub fn finish(mut self) -> CrawlJobRunSummary {
        if self.run.state == RunState::Running {
            self.run.state = RunState::Completed;
        }
        let ended_at = Utc::now();
        self.run.elapsed_ms = Some((ended_at - self.run.started_at).num_milliseconds());
        self.run.ended_at = Some(ended_at);

        if let Some(store) = self.store {
            let result = store.finish_run(&self.run);
            self.note(result);
        }

        let broken_links = broken_link_report(&self.edges, &self.missing);

        CrawlJobRunSummary {
            run: self.run,
            pages: self.pages,
            broken_links,
            persisted: self.persistence_failures == 0,
        }
    }

    fn accepting(&self, what: &str, url: &str) -> bool {
        if self.is_running() {
            return true;
        }
        debug!(
            "Ignoring {} for {} after run {} became {}",
            what,
            url,
            self.run.run_id,
            self.run.state.as_str()
        );
        false
    }

    fn note(&mut self, result: Result<(), PersistenceError>) {
        if let Err(e) = result {
            warn!("Run {}: {}", self.run.run_id, e);
            self.persistence_failures += 1;
        }
    }
}

/// For every missing page, the pages linking to it, sorted by missing URL and
/// then by source, one row per (source, target) pair.
pub fn broken_link_report(edges: &[LinkEdge], missing: &[String]) -> Vec<BrokenLink> {
    let missing_by_key: HashMap<String, &String> = missing
        .iter()
        .map(|m| (edge_key(m), m))
        .collect();

    let mut report: Vec<BrokenLink> = edges
        .iter()
        .filter_map(|edge| {
            missing_by_key
                .get(&edge_key(&edge.target))
                .map(|missing| BrokenLink {
                    missing: (*missing).clone(),
                    linked_from: edge.source.clone(),
                    anchor_text: edge.anchor_text.clone(),
                })
        })
        .collect();

    report.sort_by(|a, b| {
        a.missing
            .cmp(&b.missing)
            .then_with(|| a.linked_from.cmp(&b.linked_from))
    });
    report.dedup_by(|later, earlier| {
        later.missing == earlier.missing && later.linked_from == earlier.linked_from
    });
    report
}

fn edge_key(raw: &str) -> String {
    Url::parse(raw)
        .map(|u| identity_key(&u))
        .unwrap_or_else(|_| raw.to_string())
}
