use docaudit::commands::{command_argument_builder, parse_tag_rule};
use docaudit::handlers::*;
use docaudit_core::crawl::RunOptions;
use docaudit_core::data::{Database, RequestStatus};
use docaudit_core::report::ReportFormat;
use docaudit_scanner::CrawlJobDefinition;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn matches(args: &[&str]) -> clap::ArgMatches {
    let mut argv = vec!["docaudit"];
    argv.extend_from_slice(args);
    command_argument_builder()
        .try_get_matches_from(argv)
        .unwrap()
}

fn sub<'a>(m: &'a clap::ArgMatches, path: &[&str]) -> &'a clap::ArgMatches {
    let mut current = m;
    for name in path {
        current = current.subcommand_matches(name).unwrap();
    }
    current
}

fn init_db() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("docaudit.db");
    assert_eq!(handle_init(&db_path, false).unwrap(), 0);
    (temp_dir, db_path)
}

#[test]
fn test_cli_definition_is_consistent() {
    command_argument_builder().debug_assert();
}

#[test]
fn test_resolve_db_path_expands_tilde() {
    let path = resolve_db_path(None);
    assert!(path.ends_with(".config/docaudit/docaudit.db"));
    assert!(!path.to_string_lossy().starts_with('~'));

    let explicit = PathBuf::from("/tmp/x.db");
    assert_eq!(resolve_db_path(Some(&explicit)), explicit);
}

#[test]
fn test_init_creates_database_and_parent_dirs() {
    let (_temp_dir, db_path) = init_db();
    assert!(Database::exists(&db_path));
}

#[test]
fn test_init_keeps_existing_catalog_without_force() {
    let (_temp_dir, db_path) = init_db();
    let m = matches(&["job", "add", "docs", "--url", "https://example.com/docs/"]);
    handle_job_add(&db_path, sub(&m, &["job", "add"])).unwrap();

    handle_init(&db_path, false).unwrap();
    let db = Database::new(&db_path).unwrap();
    assert!(db.get_job("docs").unwrap().is_some());
}

#[test]
fn test_init_force_recreates_database() {
    let (_temp_dir, db_path) = init_db();
    let m = matches(&["job", "add", "docs", "--url", "https://example.com/docs/"]);
    handle_job_add(&db_path, sub(&m, &["job", "add"])).unwrap();

    handle_init(&db_path, true).unwrap();
    let db = Database::new(&db_path).unwrap();
    assert!(db.get_job("docs").unwrap().is_none());
}

#[test]
fn test_handlers_require_initialized_database() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("missing.db");
    let err = handle_job_list(&db_path).unwrap_err();
    assert!(err.to_string().contains("docaudit init"));
}

#[test]
fn test_job_add_with_scope_flags() {
    let (_temp_dir, db_path) = init_db();
    let m = matches(&[
        "job",
        "add",
        "cloud-sql-docs",
        "--url",
        "https://cloud.example.com/sql/docs/",
        "--subpath",
        "/sql/docs",
        "--limit",
        "25",
        "-k",
        "windows",
        "-k",
        "unix socket",
        "--daily",
    ]);
    assert_eq!(handle_job_add(&db_path, sub(&m, &["job", "add"])).unwrap(), 0);

    let job = Database::new(&db_path).unwrap().get_job("cloud-sql-docs").unwrap().unwrap();
    assert_eq!(job.seed_url, "https://cloud.example.com/sql/docs/");
    assert_eq!(job.subpath.as_deref(), Some("/sql/docs"));
    assert_eq!(job.page_limit, 25);
    assert!(job.single_domain);
    assert!(job.run_daily);
    assert_eq!(job.keywords, vec!["windows", "unix socket"]);
}

#[test]
fn test_job_add_rejects_bad_subpath() {
    let (_temp_dir, db_path) = init_db();
    let m = matches(&["job", "add", "docs", "--url", "https://example.com/", "--subpath", "docs"]);
    assert!(handle_job_add(&db_path, sub(&m, &["job", "add"])).is_err());
}

#[test]
fn test_job_add_rejects_zero_limit() {
    let (_temp_dir, db_path) = init_db();
    let m = matches(&["job", "add", "docs", "--url", "https://example.com/", "--limit", "0"]);
    assert!(handle_job_add(&db_path, sub(&m, &["job", "add"])).is_err());
}

#[test]
fn test_job_remove_and_show_missing() {
    let (_temp_dir, db_path) = init_db();
    let m = matches(&["job", "add", "docs", "--url", "https://example.com/"]);
    handle_job_add(&db_path, sub(&m, &["job", "add"])).unwrap();

    let m = matches(&["job", "remove", "docs"]);
    assert_eq!(handle_job_remove(&db_path, sub(&m, &["job", "remove"])).unwrap(), 0);
    assert_eq!(handle_job_remove(&db_path, sub(&m, &["job", "remove"])).unwrap(), 1);

    let m = matches(&["job", "show", "docs"]);
    assert_eq!(handle_job_show(&db_path, sub(&m, &["job", "show"])).unwrap(), 1);
}

#[tokio::test]
async fn test_run_unknown_job_exits_nonzero() {
    let (_temp_dir, db_path) = init_db();
    let m = matches(&["-q", "run", "nope"]);
    assert_eq!(handle_run(&db_path, sub(&m, &["run"]), true).await.unwrap(), 1);
}

#[test]
fn test_request_and_daily_queue() {
    let (_temp_dir, db_path) = init_db();
    let m = matches(&["job", "add", "daily-docs", "--url", "https://example.com/", "--daily"]);
    handle_job_add(&db_path, sub(&m, &["job", "add"])).unwrap();

    let m = matches(&["request", "daily-docs"]);
    assert_eq!(handle_request(&db_path, sub(&m, &["request"])).unwrap(), 0);
    let m = matches(&["request", "unknown"]);
    assert_eq!(handle_request(&db_path, sub(&m, &["request"])).unwrap(), 1);

    assert_eq!(handle_daily(&db_path).unwrap(), 0);
    let db = Database::new(&db_path).unwrap();
    assert_eq!(db.pending_requests().unwrap().len(), 2);
}

#[tokio::test]
async fn test_work_leaves_queue_untouched_when_stopped() {
    let (_temp_dir, db_path) = init_db();
    let db = Database::new(&db_path).unwrap();
    db.upsert_job(&CrawlJobDefinition::new("docs", "http://127.0.0.1:9/docs/"))
        .unwrap();
    let request = db.queue_request("docs").unwrap();

    let (_tx, rx) = watch::channel(true);
    let (worked, exit_code) = drain_queue(&db, &RunOptions::default(), rx).await.unwrap();

    assert_eq!(worked, 0);
    assert_eq!(exit_code, 1);
    let pending = db.pending_requests().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, request.id);
    assert_eq!(pending[0].status, RequestStatus::Queued);
}

#[tokio::test]
async fn test_work_requeues_interrupted_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/docs/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><title>Docs</title></html>", "text/html")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let (_temp_dir, db_path) = init_db();
    let db = Database::new(&db_path).unwrap();
    db.upsert_job(&CrawlJobDefinition::new("docs", format!("{}/docs/", server.uri())))
        .unwrap();
    let first = db.queue_request("docs").unwrap();
    db.queue_request("docs").unwrap();

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = tx.send(true);
    });

    let (worked, exit_code) = drain_queue(&db, &RunOptions::default(), rx).await.unwrap();

    assert_eq!(worked, 1);
    assert_eq!(exit_code, 1);
    let pending = db.pending_requests().unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, first.id);

    let runs = db.list_runs(Some("docs"), 10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].state, docaudit_scanner::RunState::Aborted);
}

#[tokio::test]
async fn test_work_finishes_completed_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/docs/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html><title>Docs</title></html>", "text/html"),
        )
        .mount(&server)
        .await;

    let (_temp_dir, db_path) = init_db();
    let db = Database::new(&db_path).unwrap();
    db.upsert_job(&CrawlJobDefinition::new("docs", format!("{}/docs/", server.uri())))
        .unwrap();
    db.queue_request("docs").unwrap();

    let (_tx, rx) = watch::channel(false);
    let (worked, exit_code) = drain_queue(&db, &RunOptions::default(), rx).await.unwrap();

    assert_eq!(worked, 1);
    assert_eq!(exit_code, 0);
    assert!(db.pending_requests().unwrap().is_empty());
    assert!(db.take_next_request().unwrap().is_none());
}

#[test]
fn test_report_unknown_run_exits_nonzero() {
    let (_temp_dir, db_path) = init_db();
    let m = matches(&["report", "no-such-run"]);
    assert_eq!(handle_report(&db_path, sub(&m, &["report"])).unwrap(), 1);
}

#[test]
fn test_output_options_from_args() {
    let m = matches(&[
        "crawl",
        "--url",
        "https://example.com/",
        "--format",
        "json",
        "--pages-csv",
        "pages.csv",
        "--missing-csv",
        "missing.csv",
    ]);
    let options = OutputOptions::from_args(sub(&m, &["crawl"]));
    assert_eq!(options.format, ReportFormat::Json);
    assert_eq!(options.pages_csv, Some(PathBuf::from("pages.csv")));
    assert_eq!(options.missing_csv, Some(PathBuf::from("missing.csv")));
    assert_eq!(options.output, None);
}

#[test]
fn test_job_from_args_for_adhoc_crawl() {
    let m = matches(&["crawl", "--url", "https://example.com/docs/", "--any-domain", "--limit", "5"]);
    let job = job_from_args(ADHOC_JOB_TYPE, sub(&m, &["crawl"])).unwrap();
    assert_eq!(job.job_type, "adhoc");
    assert!(!job.single_domain);
    assert_eq!(job.page_limit, 5);
}

#[test]
fn test_any_domain_conflicts_with_subpath() {
    let result = command_argument_builder().try_get_matches_from([
        "docaudit",
        "crawl",
        "--url",
        "https://example.com/docs/",
        "--any-domain",
        "--subpath",
        "/docs",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_parse_tag_rule() {
    let rule = parse_tag_rule("dual=curl (Linux); PowerShell (Windows)").unwrap();
    assert_eq!(rule.name, "dual");
    assert_eq!(rule.all_of, vec!["curl (Linux)", "PowerShell (Windows)"]);

    assert!(parse_tag_rule("no-equals").is_err());
    assert!(parse_tag_rule("=phrase").is_err());
    assert!(parse_tag_rule("empty=; ").is_err());
}

#[test]
fn test_run_options_from_args() {
    let m = matches(&[
        "crawl",
        "--url",
        "https://example.com/",
        "--workers",
        "2",
        "--tag",
        "gcloud=gcloud sql connect",
        "--tag",
        "proxy=Auth Proxy;unix socket",
        "--not-found-title",
        "404 | Docs",
    ]);
    let options = run_options(sub(&m, &["crawl"]), true);

    assert_eq!(options.workers, 2);
    assert_eq!(options.timeout_secs, 10);
    assert!(!options.show_progress);
    let names: Vec<&str> = options.extra_tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["gcloud", "proxy"]);
    assert_eq!(options.extra_tags[1].all_of, vec!["Auth Proxy", "unix socket"]);
    assert_eq!(options.not_found_title.as_deref(), Some("404 | Docs"));
}

#[test]
fn test_format_job_line() {
    let job = docaudit_scanner::CrawlJobDefinition::new("docs", "https://example.com/")
        .with_subpath("/docs")
        .with_run_daily(true);
    let line = format_job_line(&job);
    assert!(line.starts_with("docs"));
    assert!(line.contains("subpath=/docs"));
    assert!(line.contains("limit=999"));
    assert!(line.ends_with("daily"));
}
