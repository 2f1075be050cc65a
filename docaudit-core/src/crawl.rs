use crate::data::Database;
use crate::report::ReportData;
use chrono::{DateTime, Utc};
use docaudit_scanner::recorder::RunStore;
use docaudit_scanner::{
    CrawlError, CrawlJobDefinition, CrawlJobRunSummary, Crawler, ProgressCallback, TagRule,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

/// Options for one crawl run
pub struct RunOptions {
    pub workers: usize,
    pub timeout_secs: u64,
    pub show_progress: bool,
    /// Tag rules applied alongside the built-in `drest` rule.
    pub extra_tags: Vec<TagRule>,
    /// Replaces the default "Page Not Found" title sentinel.
    pub not_found_title: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout_secs: 10,
            show_progress: false,
            extra_tags: Vec::new(),
            not_found_title: None,
        }
    }
}

/// Outcome of [`execute_job`]: the run summary plus the data reports render.
pub struct JobOutcome {
    pub summary: CrawlJobRunSummary,
    pub report: ReportData,
}

impl JobOutcome {
    /// Process exit status: 0 only for a completed, fully persisted run.
    pub fn exit_code(&self) -> i32 {
        if self.summary.completed() && self.summary.persisted {
            0
        } else {
            1
        }
    }
}

/// A stop signal that flips to `true` on Ctrl+C.
pub fn ctrl_c_stop_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping crawl");
            let _ = tx.send(true);
        }
    });
    rx
}

/// Path part of a URL for progress display, `/` for the site root.
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            if path.is_empty() || path == "/" {
                "/".to_string()
            } else {
                path
            }
        })
        .unwrap_or_else(|| url.to_string())
}

/// Run one job, recording it in `db` when given.
pub async fn execute_job(
    job: &CrawlJobDefinition,
    queued_at: Option<DateTime<Utc>>,
    db: Option<&Database>,
    options: &RunOptions,
    stop: Option<watch::Receiver<bool>>,
) -> Result<JobOutcome, CrawlError> {
    let progress_bar = if options.show_progress {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .map_err(|e| CrawlError::Other(e.to_string()))?;
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message(format!("Starting {}...", job.seed_url));
        Some(pb)
    } else {
        None
    };

    let mut crawler = Crawler::with_timeout(options.timeout_secs)?.with_workers(options.workers);
    if !options.extra_tags.is_empty() {
        let mut rules = vec![TagRule::dual_rest_api()];
        rules.extend(options.extra_tags.iter().cloned());
        crawler = crawler.with_tag_rules(rules);
    }
    if let Some(title) = &options.not_found_title {
        crawler = crawler.with_not_found_title(title.clone());
    }

    if let Some(pb) = &progress_bar {
        let pb = pb.clone();
        let limit = job.page_limit;
        let callback: ProgressCallback = Arc::new(move |visited: usize, url: String| {
            pb.set_message(format!(
                "Crawling... {}/{} pages  {}",
                visited,
                limit,
                extract_url_path(&url)
            ));
        });
        crawler = crawler.with_progress_callback(callback);
    }
    if let Some(stop) = stop {
        crawler = crawler.with_stop_signal(stop);
    }

    let store = db.map(|db| db as &dyn RunStore);
    let result = crawler.run(job, queued_at, store).await;

    if let Some(pb) = &progress_bar {
        match &result {
            Ok(summary) => pb.finish_with_message(format!(
                "Crawl {}: {} pages, {} missing",
                summary.run.state.as_str(),
                summary.run.counts.pages,
                summary.run.counts.missing
            )),
            Err(_) => pb.finish_and_clear(),
        }
    }

    let summary = result?;
    if !summary.persisted {
        warn!(
            "Run {} was not fully recorded in the database",
            summary.run.run_id
        );
    }
    info!(
        "Job '{}' finished with {} broken links",
        job.job_type,
        summary.broken_links.len()
    );

    let report = ReportData::from_summary(&summary);
    Ok(JobOutcome { summary, report })
}
