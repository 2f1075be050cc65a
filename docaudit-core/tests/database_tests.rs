// Tests for the job catalog, request queue and run history

use docaudit_core::data::{Database, Ensured, RequestStatus};
use docaudit_scanner::recorder::{CrawlJobRun, RunCounts, RunState, RunStore};
use docaudit_scanner::{CrawlJobDefinition, KeywordCounts, LinkEdge, PageRecord};
use chrono::Utc;
use tempfile::TempDir;

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).unwrap();
    (temp_dir, db)
}

fn sample_run(run_id: &str, job_type: &str) -> CrawlJobRun {
    CrawlJobRun {
        run_id: run_id.to_string(),
        job_type: job_type.to_string(),
        queued_at: None,
        started_at: Utc::now(),
        ended_at: None,
        elapsed_ms: None,
        counts: RunCounts::default(),
        state: RunState::Running,
        keywords: vec!["windows".to_string()],
        tags: vec!["drest".to_string()],
    }
}

fn sample_page(url: &str, title: &str) -> PageRecord {
    let mut keyword_counts = KeywordCounts::new();
    keyword_counts.set("windows", 2);
    PageRecord {
        url: url.to_string(),
        status_code: 200,
        title: title.to_string(),
        raw_title: format!("{} | Docs", title),
        keyword_counts,
        tags: vec!["drest".to_string()],
        not_found: false,
    }
}

// ============================================================================
// Database Creation Tests
// ============================================================================

#[test]
fn test_database_creation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let db = Database::new(&db_path);
    assert!(db.is_ok());
    assert!(db_path.exists());
}

#[test]
fn test_database_exists_and_drop() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    assert!(!Database::exists(&db_path));

    {
        let _db = Database::new(&db_path).unwrap();
    }
    assert!(Database::exists(&db_path));

    Database::drop(&db_path).unwrap();
    assert!(!Database::exists(&db_path));
}

#[test]
fn test_drop_missing_database_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    assert!(Database::drop(&temp_dir.path().join("nope.db")).is_err());
}

#[test]
fn test_ensure_schema_is_idempotent() {
    let (_temp_dir, db) = create_test_db();
    assert_eq!(db.ensure_schema().unwrap(), Ensured::AlreadyExists);

    let fresh = Database::in_memory().unwrap();
    assert_eq!(fresh.ensure_schema().unwrap(), Ensured::AlreadyExists);
}

#[test]
fn test_open_leaves_schema_to_ensure() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("fresh.db");

    let db = Database::open(&db_path).unwrap();
    assert_eq!(db.ensure_schema().unwrap(), Ensured::Created);
    drop(db);

    let db = Database::open(&db_path).unwrap();
    assert_eq!(db.ensure_schema().unwrap(), Ensured::AlreadyExists);
}

// ============================================================================
// Job Catalog Tests
// ============================================================================

#[test]
fn test_upsert_and_get_job() {
    let (_temp_dir, db) = create_test_db();
    let job = CrawlJobDefinition::new("cloud-sql-docs", "https://cloud.example.com/sql/docs/")
        .with_subpath("/sql/docs")
        .with_page_limit(50)
        .with_run_daily(true);
    db.upsert_job(&job).unwrap();

    let stored = db.get_job("cloud-sql-docs").unwrap().unwrap();
    assert_eq!(stored, job);
}

#[test]
fn test_upsert_replaces_existing_job() {
    let (_temp_dir, db) = create_test_db();
    db.upsert_job(&CrawlJobDefinition::new("docs", "https://a.example.com/"))
        .unwrap();
    db.upsert_job(
        &CrawlJobDefinition::new("docs", "https://b.example.com/")
            .with_keywords(vec!["tcp".to_string()]),
    )
    .unwrap();

    let jobs = db.list_jobs().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].seed_url, "https://b.example.com/");
    assert_eq!(jobs[0].keywords, vec!["tcp".to_string()]);
}

#[test]
fn test_get_missing_job_is_none() {
    let (_temp_dir, db) = create_test_db();
    assert!(db.get_job("nope").unwrap().is_none());
}

#[test]
fn test_remove_job() {
    let (_temp_dir, db) = create_test_db();
    db.upsert_job(&CrawlJobDefinition::new("docs", "https://example.com/"))
        .unwrap();

    assert!(db.remove_job("docs").unwrap());
    assert!(!db.remove_job("docs").unwrap());
    assert!(db.list_jobs().unwrap().is_empty());
}

#[test]
fn test_daily_jobs_only_lists_scheduled() {
    let (_temp_dir, db) = create_test_db();
    db.upsert_job(&CrawlJobDefinition::new("b-daily", "https://example.com/").with_run_daily(true))
        .unwrap();
    db.upsert_job(&CrawlJobDefinition::new("manual", "https://example.com/"))
        .unwrap();
    db.upsert_job(&CrawlJobDefinition::new("a-daily", "https://example.com/").with_run_daily(true))
        .unwrap();

    let names: Vec<String> = db.daily_jobs().unwrap().into_iter().map(|j| j.job_type).collect();
    assert_eq!(names, vec!["a-daily", "b-daily"]);
}

// ============================================================================
// Request Queue Tests
// ============================================================================

#[test]
fn test_requests_are_taken_oldest_first() {
    let (_temp_dir, db) = create_test_db();
    let first = db.queue_request("one").unwrap();
    let second = db.queue_request("two").unwrap();
    assert_eq!(first.status, RequestStatus::Queued);

    let taken = db.take_next_request().unwrap().unwrap();
    assert_eq!(taken.id, first.id);
    assert_eq!(taken.job_type, "one");
    assert_eq!(taken.status, RequestStatus::Taken);

    let pending = db.pending_requests().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, second.id);

    db.finish_request(taken.id).unwrap();
    let taken = db.take_next_request().unwrap().unwrap();
    assert_eq!(taken.job_type, "two");
    assert!(db.take_next_request().unwrap().is_none());
}

#[test]
fn test_requeued_request_is_taken_again_first() {
    let (_temp_dir, db) = create_test_db();
    let first = db.queue_request("one").unwrap();
    db.queue_request("two").unwrap();

    let taken = db.take_next_request().unwrap().unwrap();
    assert_eq!(taken.id, first.id);
    assert!(db.requeue_request(taken.id).unwrap());

    let pending = db.pending_requests().unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, first.id);
    assert_eq!(pending[0].status, RequestStatus::Queued);
    assert_eq!(db.take_next_request().unwrap().unwrap().id, first.id);
}

#[test]
fn test_requeue_ignores_finished_requests() {
    let (_temp_dir, db) = create_test_db();
    let request = db.queue_request("one").unwrap();
    db.take_next_request().unwrap();
    db.finish_request(request.id).unwrap();

    assert!(!db.requeue_request(request.id).unwrap());
    assert!(db.pending_requests().unwrap().is_empty());
}

#[test]
fn test_queue_daily_jobs() {
    let (_temp_dir, db) = create_test_db();
    db.upsert_job(&CrawlJobDefinition::new("daily", "https://example.com/").with_run_daily(true))
        .unwrap();
    db.upsert_job(&CrawlJobDefinition::new("manual", "https://example.com/"))
        .unwrap();

    let queued = db.queue_daily_jobs().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].job_type, "daily");
    assert_eq!(db.pending_requests().unwrap().len(), 1);
}

// ============================================================================
// Run History Tests
// ============================================================================

#[test]
fn test_run_lifecycle_round_trip() {
    let (_temp_dir, db) = create_test_db();
    let mut run = sample_run("run-1", "docs");
    db.create_run(&run).unwrap();

    let stored = db.get_run("run-1").unwrap().unwrap();
    assert_eq!(stored.state, RunState::Running);
    assert!(stored.ended_at.is_none());

    run.counts = RunCounts {
        links: 4,
        pages: 3,
        missing: 1,
        failed: 2,
    };
    run.state = RunState::Completed;
    run.ended_at = Some(Utc::now());
    run.elapsed_ms = Some(1234);
    db.finish_run(&run).unwrap();

    let stored = db.get_run("run-1").unwrap().unwrap();
    assert_eq!(stored.state, RunState::Completed);
    assert_eq!(stored.counts, run.counts);
    assert_eq!(stored.elapsed_ms, Some(1234));
    assert_eq!(
        stored.started_at.timestamp_millis(),
        run.started_at.timestamp_millis()
    );
}

#[test]
fn test_finish_unknown_run_fails() {
    let (_temp_dir, db) = create_test_db();
    let err = db.finish_run(&sample_run("ghost", "docs")).unwrap_err();
    assert_eq!(err.operation, "finish_run");
}

#[test]
fn test_append_requires_existing_run() {
    let (_temp_dir, db) = create_test_db();
    let result = db.append_page("ghost", &sample_page("http://site/", "Home"));
    assert!(result.is_err());
}

#[test]
fn test_pages_edges_and_missing_round_trip() {
    let (_temp_dir, db) = create_test_db();
    db.create_run(&sample_run("run-1", "docs")).unwrap();

    let page = sample_page("http://site/docs/", "Docs");
    db.append_page("run-1", &page).unwrap();
    db.append_edge("run-1", &LinkEdge::new("http://site/docs/", "http://site/docs/gone", "Gone"))
        .unwrap();
    db.append_edge("run-1", &LinkEdge::new("http://site/docs/", "http://site/docs/a", "A"))
        .unwrap();
    db.append_missing("run-1", "http://site/docs/gone").unwrap();

    assert_eq!(db.get_pages("run-1").unwrap(), vec![page]);
    assert_eq!(db.get_edges("run-1").unwrap().len(), 2);
    assert_eq!(db.get_missing("run-1").unwrap(), vec!["http://site/docs/gone"]);

    let broken = db.get_broken_links("run-1").unwrap();
    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0].linked_from, "http://site/docs/");
    assert_eq!(broken[0].anchor_text, "Gone");
}

#[test]
fn test_untrusted_text_is_stored_verbatim() {
    let (_temp_dir, db) = create_test_db();
    db.create_run(&sample_run("run-1", "docs")).unwrap();

    let title = "Robert'); DROP TABLE pages;--";
    db.append_page("run-1", &sample_page("http://site/?q='x'", title))
        .unwrap();

    let pages = db.get_pages("run-1").unwrap();
    assert_eq!(pages[0].title, title);
    assert_eq!(pages[0].url, "http://site/?q='x'");
}

#[test]
fn test_list_runs_filters_by_job() {
    let (_temp_dir, db) = create_test_db();
    db.create_run(&sample_run("a", "docs")).unwrap();
    db.create_run(&sample_run("b", "blog")).unwrap();
    db.create_run(&sample_run("c", "docs")).unwrap();

    assert_eq!(db.list_runs(None, 10).unwrap().len(), 3);
    assert_eq!(db.list_runs(None, 2).unwrap().len(), 2);

    let docs = db.list_runs(Some("docs"), 10).unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|r| r.job_type == "docs"));
}
