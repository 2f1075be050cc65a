use crate::classify::{Classifier, TagRule};
use crate::error::{FetchError, Result};
use crate::extract::extract_links;
use crate::fetch::{FetchedPage, Fetcher, HttpFetcher};
use crate::frontier::Frontier;
use crate::job::{CrawlJobDefinition, CrawlScope};
use crate::recorder::{CrawlJobRunSummary, JobRunRecorder, RunStore};
use crate::result::LinkEdge;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::FuturesOrdered;
use scraper::Html;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

/// Called after every committed page with the number of pages visited so far
/// and the URL just handled.
pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

pub struct Crawler<F: Fetcher = HttpFetcher> {
    fetcher: F,
    workers: usize,
    tag_rules: Option<Vec<TagRule>>,
    not_found_title: Option<String>,
    progress_callback: Option<ProgressCallback>,
    stop_signal: Option<watch::Receiver<bool>>,
}

impl Crawler<HttpFetcher> {
    pub fn new() -> Result<Self> {
        Ok(Self::with_fetcher(HttpFetcher::new()?))
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        Ok(Self::with_fetcher(HttpFetcher::with_timeout(timeout_secs)?))
    }
}

impl<F: Fetcher> Crawler<F> {
    pub fn with_fetcher(fetcher: F) -> Self {
        Self {
            fetcher,
            workers: 1,
            tag_rules: None,
            not_found_title: None,
            progress_callback: None,
            stop_signal: None,
        }
    }

    /// Maximum number of fetches in flight at once.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// The run aborts as soon as the channel holds `true`.
    pub fn with_stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop_signal = Some(stop);
        self
    }

    pub fn with_tag_rules(mut self, rules: Vec<TagRule>) -> Self {
        self.tag_rules = Some(rules);
        self
    }

    pub fn with_not_found_title(mut self, title: impl Into<String>) -> Self {
        self.not_found_title = Some(title.into());
        self
    }

    /// Crawl one job to completion, page limit or stop signal.
    ///
    /// Fails only when the job definition is invalid or the run cannot be
    /// registered with the store. Everything that goes wrong per URL is
    /// recovered and counted.
    pub async fn run(
        &self,
        job: &CrawlJobDefinition,
        queued_at: Option<DateTime<Utc>>,
        store: Option<&dyn RunStore>,
    ) -> Result<CrawlJobRunSummary> {
        let scope = job.validate()?;
        let classifier = self.classifier_for(job);

        let mut recorder = JobRunRecorder::begin(&job.job_type, &classifier, queued_at, store)?;
        info!(
            "Starting run {} of job '{}' at {} ({} workers, limit {})",
            recorder.run_id(),
            job.job_type,
            scope.seed,
            self.workers,
            scope.page_limit
        );
        debug!(
            "Scope: domain {}, subpath {}",
            scope.filter.domain().unwrap_or("any"),
            scope.filter.subpath().unwrap_or("none")
        );

        let started = Instant::now();
        let mut stop = self.stop_signal.clone();
        let mut frontier = Frontier::new(scope.seed.clone(), scope.page_limit);
        let mut in_flight = FuturesOrdered::new();

        loop {
            if stop_requested(&stop) {
                info!("Stop requested, aborting run {}", recorder.run_id());
                recorder.abort();
                break;
            }

            while in_flight.len() < self.workers {
                let Some(url) = frontier.next() else {
                    break;
                };
                in_flight.push_back(fetch_one(&self.fetcher, url));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = wait_for_stop(&mut stop) => {
                    info!(
                        "Stop requested with {} fetches in flight, aborting run {}",
                        in_flight.len(),
                        recorder.run_id()
                    );
                    recorder.abort();
                    break;
                }
                Some((url, outcome)) = in_flight.next() => {
                    self.commit(&url, outcome, &scope, &classifier, &mut frontier, &mut recorder);
                }
            }
        }

        // Abandoned fetches are dropped here, before the run is finalized
        drop(in_flight);

        if frontier.limit_reached() {
            debug!("Page limit of {} reached", scope.page_limit);
        }

        let summary = recorder.finish();
        info!(
            "Run {} {} in {:.2?}: {} pages, {} links, {} missing, {} failed",
            summary.run.run_id,
            summary.run.state.as_str(),
            started.elapsed(),
            summary.run.counts.pages,
            summary.run.counts.links,
            summary.run.counts.missing,
            summary.run.counts.failed
        );
        Ok(summary)
    }

    fn classifier_for(&self, job: &CrawlJobDefinition) -> Classifier {
        let mut classifier = Classifier::new(job.keywords.clone());
        if let Some(rules) = &self.tag_rules {
            classifier = classifier.with_tag_rules(rules.clone());
        }
        if let Some(title) = &self.not_found_title {
            classifier = classifier.with_not_found_title(title.clone());
        }
        classifier
    }

    fn commit(
        &self,
        url: &Url,
        outcome: std::result::Result<FetchedPage, FetchError>,
        scope: &CrawlScope,
        classifier: &Classifier,
        frontier: &mut Frontier,
        recorder: &mut JobRunRecorder<'_>,
    ) {
        let page = match outcome {
            Ok(page) => page,
            Err(e) => {
                warn!("Failed to fetch {}: {}", url, e);
                frontier.mark_failed(url);
                recorder.record_failure(url, &e);
                return;
            }
        };

        frontier.mark_visited(url);

        if !page.is_html() {
            debug!("Skipping non-HTML content at {} ({:?})", url, page.content_type);
            recorder.record_page(url, None);
            self.report_progress(frontier, url);
            return;
        }

        let document = Html::parse_document(&page.body);
        let record = classifier.classify(url, page.status_code, &document);
        let not_found = record.not_found;
        recorder.record_page(url, Some(record));
        if not_found {
            debug!("{} is a missing page", url);
            recorder.record_missing(url);
        }

        for link in extract_links(&document, url) {
            if !scope.filter.allows(&link.target) {
                continue;
            }
            let edge = LinkEdge::new(url.as_str(), link.target.as_str(), link.anchor_text);
            let discovered = frontier.offer(link.target);
            recorder.record_link(edge, discovered);
        }

        self.report_progress(frontier, url);
    }

    fn report_progress(&self, frontier: &Frontier, url: &Url) {
        if let Some(callback) = &self.progress_callback {
            callback(frontier.visited_count(), url.to_string());
        }
    }
}

async fn fetch_one<F: Fetcher>(
    fetcher: &F,
    url: Url,
) -> (Url, std::result::Result<FetchedPage, FetchError>) {
    let outcome = fetcher.fetch(&url).await;
    (url, outcome)
}

fn stop_requested(stop: &Option<watch::Receiver<bool>>) -> bool {
    stop.as_ref().is_some_and(|rx| *rx.borrow())
}

async fn wait_for_stop(stop: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = stop {
        if rx.wait_for(|stopped| *stopped).await.is_ok() {
            return;
        }
        // Sender gone without a stop; nothing can stop the run any more
        *stop = None;
    }
    std::future::pending::<()>().await
}
