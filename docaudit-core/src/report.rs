// Run reports: page classification CSV, broken-link CSV, text and JSON

use crate::data::Database;
use chrono::{DateTime, Utc};
use docaudit_scanner::recorder::{CrawlJobRun, CrawlJobRunSummary, RunState};
use docaudit_scanner::{BrokenLink, PageRecord};
use rusqlite::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
    Csv,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "csv" => Some(ReportFormat::Csv),
            _ => None,
        }
    }
}

/// Everything a report needs about one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub run: CrawlJobRun,
    /// Keyword columns, in configured order.
    pub keywords: Vec<String>,
    /// Tag columns.
    pub tags: Vec<String>,
    pub pages: Vec<PageRecord>,
    pub broken_links: Vec<BrokenLink>,
}

impl ReportData {
    pub fn from_summary(summary: &CrawlJobRunSummary) -> Self {
        Self {
            run: summary.run.clone(),
            keywords: summary.run.keywords.clone(),
            tags: summary.run.tags.clone(),
            pages: summary.pages.clone(),
            broken_links: summary.broken_links.clone(),
        }
    }

    /// Pages carrying `tag`.
    pub fn tagged(&self, tag: &str) -> usize {
        self.pages.iter().filter(|p| p.has_tag(tag)).count()
    }
}

/// Load a stored run with the keyword and tag columns it was crawled with.
pub fn gather_report_data(db: &Database, run_id: &str) -> Result<Option<ReportData>> {
    let Some(run) = db.get_run(run_id)? else {
        return Ok(None);
    };
    let pages = db.get_pages(run_id)?;
    let broken_links = db.get_broken_links(run_id)?;

    Ok(Some(ReportData {
        keywords: run.keywords.clone(),
        tags: run.tags.clone(),
        run,
        pages,
        broken_links,
    }))
}

/// Page classification table: title, one column per keyword and tag, URL.
/// Zero counts and unset tags are empty cells.
pub fn write_pages_csv<W: Write>(writer: W, data: &ReportData) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = vec!["Page Title".to_string()];
    header.extend(data.keywords.iter().cloned());
    header.extend(data.tags.iter().cloned());
    header.push("URL".to_string());
    wtr.write_record(&header)?;

    for page in &data.pages {
        let mut row = vec![page.title.clone()];
        row.extend(data.keywords.iter().map(|k| page.keyword_counts.cell(k)));
        row.extend(data.tags.iter().map(|t| {
            if page.has_tag(t) {
                "Yes".to_string()
            } else {
                String::new()
            }
        }));
        row.push(page.url.clone());
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn write_broken_links_csv<W: Write>(writer: W, links: &[BrokenLink]) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["missing", "linked_from", "anchor_text"])?;
    for link in links {
        wtr.write_record([&link.missing, &link.linked_from, &link.anchor_text])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_pages_csv(path: &Path, data: &ReportData) -> csv::Result<()> {
    write_pages_csv(File::create(path)?, data)
}

pub fn save_broken_links_csv(path: &Path, links: &[BrokenLink]) -> csv::Result<()> {
    write_broken_links_csv(File::create(path)?, links)
}

pub fn generate_text_report(data: &ReportData) -> String {
    let run = &data.run;
    let mut report = String::new();

    report.push_str(RULE);
    report.push_str("                          DOCAUDIT CRAWL RUN REPORT\n");
    report.push_str(RULE);
    report.push('\n');

    report.push_str(&format!("Run ID:       {}\n", run.run_id));
    report.push_str(&format!("Job:          {}\n", run.job_type));
    report.push_str(&format!("Status:       {}\n", status_label(run)));
    if let Some(queued_at) = run.queued_at {
        report.push_str(&format!("Queued:       {}\n", format_timestamp(&queued_at)));
    }
    report.push_str(&format!("Started:      {}\n", format_timestamp(&run.started_at)));
    if let Some(ended_at) = run.ended_at {
        report.push_str(&format!("Ended:        {}\n", format_timestamp(&ended_at)));
    }
    if let Some(elapsed) = run.elapsed_ms {
        report.push_str(&format!("Elapsed:      {:.1} seconds\n", elapsed as f64 / 1000.0));
    }
    report.push('\n');

    report.push_str(RULE);
    report.push_str("SUMMARY\n");
    report.push_str(RULE);
    report.push('\n');
    report.push_str(&format!("  Pages crawled:    {}\n", run.counts.pages));
    report.push_str(&format!("  Links discovered: {}\n", run.counts.links));
    report.push_str(&format!("  Missing pages:    {}\n", run.counts.missing));
    if run.counts.failed > 0 {
        report.push_str(&format!("  Failed fetches:   {}\n", run.counts.failed));
    }
    for tag in &data.tags {
        report.push_str(&format!("  Tagged {:<10} {}\n", tag, data.tagged(tag)));
    }
    report.push('\n');

    let totals = keyword_totals(data);
    if !totals.is_empty() {
        report.push_str(RULE);
        report.push_str("KEYWORDS\n");
        report.push_str(RULE);
        report.push('\n');
        for keyword in &data.keywords {
            let (occurrences, pages) = totals.get(keyword.as_str()).copied().unwrap_or((0, 0));
            report.push_str(&format!(
                "  {:<16} {:>6} occurrences on {} pages\n",
                keyword, occurrences, pages
            ));
        }
        report.push('\n');
    }

    report.push_str(RULE);
    report.push_str("BROKEN LINKS\n");
    report.push_str(RULE);
    report.push('\n');

    if data.broken_links.is_empty() {
        report.push_str("No broken links found.\n");
    } else {
        let mut current: Option<&str> = None;
        for link in &data.broken_links {
            if current != Some(link.missing.as_str()) {
                if current.is_some() {
                    report.push('\n');
                }
                report.push_str(&format!("This page does not exist: {}\n", link.missing));
                current = Some(&link.missing);
            }
            if link.anchor_text.is_empty() {
                report.push_str(&format!("  linked from {}\n", link.linked_from));
            } else {
                report.push_str(&format!(
                    "  linked from {} (\"{}\")\n",
                    link.linked_from, link.anchor_text
                ));
            }
        }
    }

    report
}

pub fn generate_json_report(data: &ReportData) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(data)
}

/// Render a report in `format`. CSV renders the page classification table.
pub fn render(data: &ReportData, format: ReportFormat) -> std::io::Result<String> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(data)),
        ReportFormat::Json => generate_json_report(data).map_err(std::io::Error::other),
        ReportFormat::Csv => {
            let mut buf = Vec::new();
            write_pages_csv(&mut buf, data).map_err(std::io::Error::other)?;
            String::from_utf8(buf).map_err(std::io::Error::other)
        }
    }
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn status_label(run: &CrawlJobRun) -> &'static str {
    match run.state {
        RunState::Completed => "Completed",
        RunState::Aborted => "Aborted",
        RunState::Running => "Running (or interrupted)",
        RunState::Idle => "Idle",
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// keyword -> (total occurrences, pages containing it)
fn keyword_totals(data: &ReportData) -> BTreeMap<&str, (usize, usize)> {
    let mut totals: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for page in &data.pages {
        for (keyword, count) in page.keyword_counts.iter() {
            let entry = totals.entry(keyword).or_default();
            entry.0 += count;
            entry.1 += 1;
        }
    }
    totals
}
