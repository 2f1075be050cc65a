use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use colored::Colorize;
use docaudit_core::crawl::{JobOutcome, RunOptions, ctrl_c_stop_signal, execute_job};
use docaudit_core::data::{Database, Ensured};
use docaudit_core::report::{
    ReportData, ReportFormat, gather_report_data, render, save_broken_links_csv, save_pages_csv,
    save_report,
};
use docaudit_scanner::recorder::{CrawlJobRun, RunState};
use docaudit_scanner::{CrawlJobDefinition, TagRule};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_DB_PATH: &str = "~/.config/docaudit/docaudit.db";
pub const ADHOC_JOB_TYPE: &str = "adhoc";

/// Where report output goes after a run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputOptions {
    pub format: ReportFormat,
    pub output: Option<PathBuf>,
    pub pages_csv: Option<PathBuf>,
    pub missing_csv: Option<PathBuf>,
}

impl OutputOptions {
    pub fn from_args(args: &ArgMatches) -> Self {
        let format = args
            .try_get_one::<String>("format")
            .ok()
            .flatten()
            .and_then(|f| ReportFormat::parse(f))
            .unwrap_or(ReportFormat::Text);
        Self {
            format,
            output: optional_path(args, "output"),
            pages_csv: optional_path(args, "pages-csv"),
            missing_csv: optional_path(args, "missing-csv"),
        }
    }
}

fn optional_path(args: &ArgMatches, id: &str) -> Option<PathBuf> {
    args.try_get_one::<PathBuf>(id).ok().flatten().cloned()
}

pub fn resolve_db_path(arg: Option<&PathBuf>) -> PathBuf {
    match arg {
        Some(path) => PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref()),
        None => PathBuf::from(shellexpand::tilde(DEFAULT_DB_PATH).as_ref()),
    }
}

fn open_db(db_path: &Path) -> Result<Database> {
    if !Database::exists(db_path) {
        bail!(
            "no database at {}; run `docaudit init` first",
            db_path.display()
        );
    }
    Database::new(db_path).with_context(|| format!("failed to open {}", db_path.display()))
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

/// Apply `--subpath`, `--any-domain`, `--limit` and `--keyword` to a job.
pub fn apply_scope_overrides(mut job: CrawlJobDefinition, args: &ArgMatches) -> CrawlJobDefinition {
    if let Some(subpath) = args.get_one::<String>("subpath") {
        job = job.with_subpath(subpath.clone());
    }
    if args.get_flag("any-domain") {
        job = job.with_single_domain(false);
    }
    if let Some(limit) = args.get_one::<usize>("limit") {
        job = job.with_page_limit(*limit);
    }
    if let Some(keywords) = args.get_many::<String>("keyword") {
        job = job.with_keywords(keywords.cloned().collect());
    }
    job
}

/// A job definition from `--url` plus scope flags.
pub fn job_from_args(job_type: &str, args: &ArgMatches) -> Result<CrawlJobDefinition> {
    let url = args
        .get_one::<Url>("url")
        .context("--url is required")?;
    let job = apply_scope_overrides(CrawlJobDefinition::new(job_type, url.as_str()), args);
    job.validate()?;
    Ok(job)
}

pub fn run_options(args: &ArgMatches, quiet: bool) -> RunOptions {
    RunOptions {
        workers: args.get_one::<usize>("workers").copied().unwrap_or(4),
        timeout_secs: args.get_one::<u64>("timeout").copied().unwrap_or(10),
        show_progress: !quiet,
        extra_tags: args
            .get_many::<TagRule>("tag")
            .map(|rules| rules.cloned().collect())
            .unwrap_or_default(),
        not_found_title: args.get_one::<String>("not-found-title").cloned(),
    }
}

// init

pub fn handle_init(db_path: &Path, force: bool) -> Result<i32> {
    print_divider();
    println!("{}", "  DOCAUDIT INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    if Database::exists(db_path) {
        if force {
            println!("{} Deleting existing database (force mode)", "→".yellow().bold());
            Database::drop(db_path)
                .with_context(|| format!("failed to remove {}", db_path.display()))?;
        } else {
            println!(
                "{} Database already exists at {}; use --force to recreate it",
                "⚠".yellow().bold(),
                db_path.display().to_string().bright_white()
            );
        }
    }

    let db = Database::open(db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let status = match db.ensure_schema()? {
        Ensured::Created => "Database created",
        Ensured::AlreadyExists => "Database already initialized",
    };

    println!(
        "{} {}: {}",
        "✓".green().bold(),
        status,
        db_path.display().to_string().bright_white()
    );
    Ok(0)
}

// job catalog

pub fn handle_job_add(db_path: &Path, args: &ArgMatches) -> Result<i32> {
    let db = open_db(db_path)?;
    let job_type = args
        .get_one::<String>("JOB_TYPE")
        .context("JOB_TYPE is required")?;
    let job = job_from_args(job_type, args)?.with_run_daily(args.get_flag("daily"));

    db.upsert_job(&job)?;
    println!("{} Saved job '{}'", "✓".green().bold(), job.job_type);
    Ok(0)
}

pub fn handle_job_list(db_path: &Path) -> Result<i32> {
    let db = open_db(db_path)?;
    let jobs = db.list_jobs()?;
    if jobs.is_empty() {
        println!("No jobs defined. Add one with `docaudit job add`.");
        return Ok(0);
    }
    for job in jobs {
        println!("{}", format_job_line(&job));
    }
    Ok(0)
}

pub fn format_job_line(job: &CrawlJobDefinition) -> String {
    let mut line = format!("{:<24} {}", job.job_type, job.seed_url);
    if let Some(subpath) = &job.subpath {
        line.push_str(&format!(" subpath={}", subpath));
    }
    if !job.single_domain {
        line.push_str(" any-domain");
    }
    line.push_str(&format!(" limit={}", job.page_limit));
    if job.run_daily {
        line.push_str(" daily");
    }
    line
}

pub fn handle_job_show(db_path: &Path, args: &ArgMatches) -> Result<i32> {
    let db = open_db(db_path)?;
    let job_type = args
        .get_one::<String>("JOB_TYPE")
        .context("JOB_TYPE is required")?;
    match db.get_job(job_type)? {
        Some(job) => {
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(0)
        }
        None => {
            eprintln!("{} No job '{}'", "✗".red().bold(), job_type);
            Ok(1)
        }
    }
}

pub fn handle_job_remove(db_path: &Path, args: &ArgMatches) -> Result<i32> {
    let db = open_db(db_path)?;
    let job_type = args
        .get_one::<String>("JOB_TYPE")
        .context("JOB_TYPE is required")?;
    if db.remove_job(job_type)? {
        println!("{} Removed job '{}'", "✓".green().bold(), job_type);
        Ok(0)
    } else {
        eprintln!("{} No job '{}'", "✗".red().bold(), job_type);
        Ok(1)
    }
}

// runs

pub async fn handle_run(db_path: &Path, args: &ArgMatches, quiet: bool) -> Result<i32> {
    let db = open_db(db_path)?;
    let job_type = args
        .get_one::<String>("JOB_TYPE")
        .context("JOB_TYPE is required")?;
    let Some(job) = db.get_job(job_type)? else {
        eprintln!("{} No job '{}' in the catalog", "✗".red().bold(), job_type);
        return Ok(1);
    };
    let job = apply_scope_overrides(job, args);

    run_and_report(&job, None, Some(&db), args, quiet).await
}

pub async fn handle_crawl(db_path: &Path, args: &ArgMatches, quiet: bool) -> Result<i32> {
    let job = job_from_args(ADHOC_JOB_TYPE, args)?;

    let db = if Database::exists(db_path) {
        Some(open_db(db_path)?)
    } else {
        warn!(
            "No database at {}; this run will not be recorded",
            db_path.display()
        );
        None
    };

    run_and_report(&job, None, db.as_ref(), args, quiet).await
}

async fn run_and_report(
    job: &CrawlJobDefinition,
    queued_at: Option<DateTime<Utc>>,
    db: Option<&Database>,
    args: &ArgMatches,
    quiet: bool,
) -> Result<i32> {
    let options = run_options(args, quiet);
    let outcome = execute_job(job, queued_at, db, &options, Some(ctrl_c_stop_signal()))
        .await
        .with_context(|| format!("job '{}' could not run", job.job_type))?;

    print_outcome(&outcome);
    write_outputs(&outcome.report, &OutputOptions::from_args(args))?;
    Ok(outcome.exit_code())
}

fn print_outcome(outcome: &JobOutcome) {
    let run = &outcome.summary.run;
    let mark = if outcome.exit_code() == 0 {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!(
        "{} Run {} {}: {} pages, {} links, {} missing, {} failed",
        mark,
        run.run_id,
        run.state.as_str(),
        run.counts.pages,
        run.counts.links,
        run.counts.missing,
        run.counts.failed
    );
    if !outcome.summary.persisted {
        println!("{} Run was not fully recorded in the database", "⚠".yellow().bold());
    }
}

/// Write CSV files and the report as requested. Without `--output` the report
/// goes to stdout.
pub fn write_outputs(report: &ReportData, options: &OutputOptions) -> Result<()> {
    if let Some(path) = &options.pages_csv {
        save_pages_csv(path, report)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote page table to {}", path.display());
    }
    if let Some(path) = &options.missing_csv {
        save_broken_links_csv(path, &report.broken_links)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote broken links to {}", path.display());
    }

    let content = render(report, options.format)?;
    match &options.output {
        Some(path) => {
            save_report(&content, path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "{} Report saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => println!("{}", content),
    }
    Ok(())
}

// request queue

pub fn handle_request(db_path: &Path, args: &ArgMatches) -> Result<i32> {
    let db = open_db(db_path)?;
    let job_type = args
        .get_one::<String>("JOB_TYPE")
        .context("JOB_TYPE is required")?;
    if db.get_job(job_type)?.is_none() {
        eprintln!("{} No job '{}' in the catalog", "✗".red().bold(), job_type);
        return Ok(1);
    }
    let request = db.queue_request(job_type)?;
    println!(
        "{} Queued request {} for '{}'",
        "✓".green().bold(),
        request.id,
        request.job_type
    );
    Ok(0)
}

pub fn handle_daily(db_path: &Path) -> Result<i32> {
    let db = open_db(db_path)?;
    let requests = db.queue_daily_jobs()?;
    for request in &requests {
        println!("{} Queued '{}'", "→".blue(), request.job_type);
    }
    println!("{} {} daily jobs queued", "✓".green().bold(), requests.len());
    Ok(0)
}

pub async fn handle_work(db_path: &Path, args: &ArgMatches, quiet: bool) -> Result<i32> {
    let db = open_db(db_path)?;
    let options = run_options(args, quiet);
    let (worked, exit_code) = drain_queue(&db, &options, ctrl_c_stop_signal()).await?;

    println!("{} {} requests worked", "✓".green().bold(), worked);
    Ok(exit_code)
}

/// Work queued requests oldest first until the queue is empty or `stop` is
/// set. A request whose run was interrupted goes back on the queue. Returns
/// the number of requests taken and the exit status.
pub async fn drain_queue(
    db: &Database,
    options: &RunOptions,
    stop: watch::Receiver<bool>,
) -> Result<(usize, i32)> {
    let mut exit_code = 0;
    let mut worked = 0;

    loop {
        if *stop.borrow() {
            info!("Stop requested, leaving remaining requests queued");
            exit_code = 1;
            break;
        }
        let Some(request) = db.take_next_request()? else {
            break;
        };
        worked += 1;

        let Some(job) = db.get_job(&request.job_type)? else {
            warn!("Request {} names unknown job '{}'", request.id, request.job_type);
            db.finish_request(request.id)?;
            exit_code = 1;
            continue;
        };

        let outcome = execute_job(
            &job,
            Some(request.queued_at),
            Some(db),
            options,
            Some(stop.clone()),
        )
        .await;

        match outcome {
            Ok(outcome) => {
                print_outcome(&outcome);
                exit_code = exit_code.max(outcome.exit_code());
                if outcome.summary.run.state == RunState::Aborted {
                    db.requeue_request(request.id)?;
                    info!("Request {} returned to the queue", request.id);
                    break;
                }
                db.finish_request(request.id)?;
            }
            Err(e) => {
                db.finish_request(request.id)?;
                eprintln!("{} Job '{}' could not run: {}", "✗".red().bold(), job.job_type, e);
                exit_code = 1;
            }
        }
    }

    Ok((worked, exit_code))
}

// history

pub fn handle_runs(db_path: &Path, args: &ArgMatches) -> Result<i32> {
    let db = open_db(db_path)?;
    let job = args.get_one::<String>("job").map(|s| s.as_str());
    let limit = args.get_one::<usize>("limit").copied().unwrap_or(20);

    let runs = db.list_runs(job, limit)?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(0);
    }
    for run in &runs {
        println!("{}", format_run_line(run));
    }
    Ok(0)
}

pub fn format_run_line(run: &CrawlJobRun) -> String {
    format!(
        "{}  {:<20} {:<10} {}  pages={} links={} missing={}",
        run.run_id,
        run.job_type,
        run.state.as_str(),
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        run.counts.pages,
        run.counts.links,
        run.counts.missing
    )
}

pub fn handle_report(db_path: &Path, args: &ArgMatches) -> Result<i32> {
    let db = open_db(db_path)?;
    let run_id = args
        .get_one::<String>("RUN_ID")
        .context("RUN_ID is required")?;
    let Some(report) = gather_report_data(&db, run_id)? else {
        eprintln!("{} No run '{}'", "✗".red().bold(), run_id);
        return Ok(1);
    };

    let options = OutputOptions::from_args(args);
    write_outputs(&report, &options)?;
    Ok(0)
}
