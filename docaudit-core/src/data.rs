use chrono::{DateTime, Utc};
use docaudit_scanner::error::PersistenceError;
use docaudit_scanner::recorder::{
    CrawlJobRun, RunCounts, RunState, RunStore, broken_link_report,
};
use docaudit_scanner::{BrokenLink, CrawlJobDefinition, KeywordCounts, LinkEdge, PageRecord};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result, Row, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub struct Database {
    conn: Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Queued,
    Taken,
    Done,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Queued => "queued",
            RequestStatus::Taken => "taken",
            RequestStatus::Done => "done",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RequestStatus::Queued),
            "taken" => Some(RequestStatus::Taken),
            "done" => Some(RequestStatus::Done),
            _ => None,
        }
    }
}

/// A queued request to run one catalog job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub id: i64,
    pub job_type: String,
    pub queued_at: DateTime<Utc>,
    pub status: RequestStatus,
}

/// Whether an idempotent provisioning step did any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Created,
    AlreadyExists,
}

const SCHEMA: &str = "
-- Job catalog
CREATE TABLE IF NOT EXISTS job_definitions (
    job_type TEXT PRIMARY KEY,
    seed_url TEXT NOT NULL,
    single_domain BOOLEAN NOT NULL DEFAULT 1,
    subpath TEXT,
    page_limit INTEGER NOT NULL CHECK(page_limit > 0),
    run_daily BOOLEAN NOT NULL DEFAULT 0,
    keywords TEXT NOT NULL       -- JSON array
);

-- Requests waiting to be worked
CREATE TABLE IF NOT EXISTS job_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_type TEXT NOT NULL,
    queued_at INTEGER NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('queued', 'taken', 'done'))
);

-- Run history
CREATE TABLE IF NOT EXISTS job_runs (
    id TEXT PRIMARY KEY,
    job_type TEXT NOT NULL,
    queued_at INTEGER,
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    elapsed_ms INTEGER,
    links INTEGER NOT NULL DEFAULT 0,
    pages INTEGER NOT NULL DEFAULT 0,
    missing INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL CHECK(state IN ('idle', 'running', 'completed', 'aborted')),
    keywords TEXT NOT NULL,  -- JSON array, report column order
    tags TEXT NOT NULL       -- JSON array
);

-- Classified pages, in visit order
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    url TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    title TEXT NOT NULL,
    raw_title TEXT NOT NULL,
    keyword_counts TEXT NOT NULL,  -- JSON object, zero counts omitted
    tags TEXT NOT NULL,            -- JSON array
    not_found BOOLEAN NOT NULL,
    FOREIGN KEY(run_id) REFERENCES job_runs(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS link_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    anchor_text TEXT NOT NULL,
    FOREIGN KEY(run_id) REFERENCES job_runs(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS missing_pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    url TEXT NOT NULL,
    FOREIGN KEY(run_id) REFERENCES job_runs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_job_runs_job_type ON job_runs(job_type);
CREATE INDEX IF NOT EXISTS idx_job_requests_status ON job_requests(status, queued_at);
CREATE INDEX IF NOT EXISTS idx_pages_run ON pages(run_id);
CREATE INDEX IF NOT EXISTS idx_link_edges_run ON link_edges(run_id);
CREATE INDEX IF NOT EXISTS idx_missing_pages_run ON missing_pages(run_id);
";

const RUN_COLUMNS: &str = "id, job_type, queued_at, started_at, ended_at, elapsed_ms, \
                           links, pages, missing, failed, state, keywords, tags";

impl Database {
    /// Remove a database file along with its WAL side files.
    pub fn drop(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)?;
        for suffix in ["-wal", "-shm"] {
            let mut side = path.as_os_str().to_owned();
            side.push(suffix);
            let side = Path::new(&side);
            if side.exists() {
                fs::remove_file(side)?;
            }
        }
        Ok(())
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    /// Open a database and make sure every table exists.
    pub fn new(path: &Path) -> Result<Self> {
        let db = Self::open(path)?;
        db.ensure_schema()?;
        Ok(db)
    }

    /// Open a database without touching its schema.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        Ok(Database { conn })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database { conn };
        db.ensure_schema()?;
        Ok(db)
    }

    /// Create any missing tables. Safe to call on an existing database.
    pub fn ensure_schema(&self) -> Result<Ensured> {
        let existing: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'job_runs'",
            [],
            |row| row.get(0),
        )?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(if existing > 0 {
            Ensured::AlreadyExists
        } else {
            Ensured::Created
        })
    }

    // Job catalog

    pub fn upsert_job(&self, job: &CrawlJobDefinition) -> Result<()> {
        let keywords = to_json(&job.keywords)?;
        self.conn.execute(
            "INSERT INTO job_definitions
                (job_type, seed_url, single_domain, subpath, page_limit, run_daily, keywords)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(job_type) DO UPDATE SET
                seed_url = excluded.seed_url,
                single_domain = excluded.single_domain,
                subpath = excluded.subpath,
                page_limit = excluded.page_limit,
                run_daily = excluded.run_daily,
                keywords = excluded.keywords",
            params![
                &job.job_type,
                &job.seed_url,
                job.single_domain,
                &job.subpath,
                job.page_limit as i64,
                job.run_daily,
                keywords,
            ],
        )?;
        Ok(())
    }

    pub fn get_job(&self, job_type: &str) -> Result<Option<CrawlJobDefinition>> {
        self.conn
            .query_row(
                "SELECT job_type, seed_url, single_domain, subpath, page_limit, run_daily, keywords
                 FROM job_definitions WHERE job_type = ?1",
                params![job_type],
                job_from_row,
            )
            .optional()
    }

    pub fn list_jobs(&self) -> Result<Vec<CrawlJobDefinition>> {
        let mut stmt = self.conn.prepare(
            "SELECT job_type, seed_url, single_domain, subpath, page_limit, run_daily, keywords
             FROM job_definitions ORDER BY job_type",
        )?;
        let jobs = stmt.query_map([], job_from_row)?.collect::<Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Returns whether a job was removed.
    pub fn remove_job(&self, job_type: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM job_definitions WHERE job_type = ?1",
            params![job_type],
        )?;
        Ok(removed > 0)
    }

    pub fn daily_jobs(&self) -> Result<Vec<CrawlJobDefinition>> {
        let mut stmt = self.conn.prepare(
            "SELECT job_type, seed_url, single_domain, subpath, page_limit, run_daily, keywords
             FROM job_definitions WHERE run_daily = 1 ORDER BY job_type",
        )?;
        let jobs = stmt.query_map([], job_from_row)?.collect::<Result<Vec<_>>>()?;
        Ok(jobs)
    }

    // Request queue

    pub fn queue_request(&self, job_type: &str) -> Result<JobRequest> {
        let queued_at = Utc::now();
        self.conn.execute(
            "INSERT INTO job_requests (job_type, queued_at, status) VALUES (?1, ?2, ?3)",
            params![job_type, queued_at.timestamp_millis(), RequestStatus::Queued.as_str()],
        )?;
        Ok(JobRequest {
            id: self.conn.last_insert_rowid(),
            job_type: job_type.to_string(),
            queued_at,
            status: RequestStatus::Queued,
        })
    }

    /// Claim the oldest queued request.
    pub fn take_next_request(&self) -> Result<Option<JobRequest>> {
        self.conn
            .query_row(
                "UPDATE job_requests SET status = 'taken'
                 WHERE id = (
                    SELECT id FROM job_requests WHERE status = 'queued'
                    ORDER BY queued_at, id LIMIT 1
                 )
                 RETURNING id, job_type, queued_at, status",
                [],
                request_from_row,
            )
            .optional()
    }

    pub fn finish_request(&self, id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE job_requests SET status = 'done' WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Return a taken request to the queue. Its original queue time is kept,
    /// so it is the next one taken.
    pub fn requeue_request(&self, id: i64) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE job_requests SET status = 'queued' WHERE id = ?1 AND status = 'taken'",
            params![id],
        )?;
        Ok(updated > 0)
    }

    pub fn pending_requests(&self) -> Result<Vec<JobRequest>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_type, queued_at, status FROM job_requests
             WHERE status = 'queued' ORDER BY queued_at, id",
        )?;
        let requests = stmt.query_map([], request_from_row)?.collect::<Result<Vec<_>>>()?;
        Ok(requests)
    }

    /// Queue one request for every run-daily job. Returns the requests made.
    pub fn queue_daily_jobs(&self) -> Result<Vec<JobRequest>> {
        self.daily_jobs()?
            .iter()
            .map(|job| self.queue_request(&job.job_type))
            .collect()
    }

    // Run history

    pub fn get_run(&self, run_id: &str) -> Result<Option<CrawlJobRun>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM job_runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()
    }

    /// Most recent runs first, optionally for one job type.
    pub fn list_runs(&self, job_type: Option<&str>, limit: usize) -> Result<Vec<CrawlJobRun>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM job_runs
             WHERE (?1 IS NULL OR job_type = ?1)
             ORDER BY started_at DESC, rowid DESC LIMIT ?2",
            RUN_COLUMNS
        ))?;
        let runs = stmt
            .query_map(params![job_type, limit as i64], run_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(runs)
    }

    pub fn get_pages(&self, run_id: &str) -> Result<Vec<PageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, status_code, title, raw_title, keyword_counts, tags, not_found
             FROM pages WHERE run_id = ?1 ORDER BY id",
        )?;
        let pages = stmt
            .query_map(params![run_id], |row| {
                Ok(PageRecord {
                    url: row.get(0)?,
                    status_code: row.get(1)?,
                    title: row.get(2)?,
                    raw_title: row.get(3)?,
                    keyword_counts: from_json::<KeywordCounts>(row, 4)?,
                    tags: from_json::<Vec<String>>(row, 5)?,
                    not_found: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(pages)
    }

    pub fn get_edges(&self, run_id: &str) -> Result<Vec<LinkEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT source, target, anchor_text FROM link_edges WHERE run_id = ?1 ORDER BY id",
        )?;
        let edges = stmt
            .query_map(params![run_id], |row| {
                Ok(LinkEdge::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(edges)
    }

    pub fn get_missing(&self, run_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM missing_pages WHERE run_id = ?1 ORDER BY id")?;
        let missing = stmt
            .query_map(params![run_id], |row| row.get(0))?
            .collect::<Result<Vec<String>>>()?;
        Ok(missing)
    }

    /// Rebuild the broken-link report of a stored run.
    pub fn get_broken_links(&self, run_id: &str) -> Result<Vec<BrokenLink>> {
        let edges = self.get_edges(run_id)?;
        let missing = self.get_missing(run_id)?;
        Ok(broken_link_report(&edges, &missing))
    }

    fn insert_run(&self, run: &CrawlJobRun) -> Result<()> {
        self.conn.execute(
            "INSERT INTO job_runs (id, job_type, queued_at, started_at, state, keywords, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &run.run_id,
                &run.job_type,
                run.queued_at.map(|t| t.timestamp_millis()),
                run.started_at.timestamp_millis(),
                run.state.as_str(),
                to_json(&run.keywords)?,
                to_json(&run.tags)?,
            ],
        )?;
        Ok(())
    }

    fn store_run(&self, run: &CrawlJobRun) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE job_runs SET
                ended_at = ?2, elapsed_ms = ?3,
                links = ?4, pages = ?5, missing = ?6, failed = ?7,
                state = ?8
             WHERE id = ?1",
            params![
                &run.run_id,
                run.ended_at.map(|t| t.timestamp_millis()),
                run.elapsed_ms,
                run.counts.links as i64,
                run.counts.pages as i64,
                run.counts.missing as i64,
                run.counts.failed as i64,
                run.state.as_str(),
            ],
        )?;
        if updated == 0 {
            return Err(rusqlite::Error::QueryReturnedNoRows);
        }
        Ok(())
    }

    fn insert_page(&self, run_id: &str, page: &PageRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO pages
                (run_id, url, status_code, title, raw_title, keyword_counts, tags, not_found)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                &page.url,
                page.status_code,
                &page.title,
                &page.raw_title,
                to_json(&page.keyword_counts)?,
                to_json(&page.tags)?,
                page.not_found,
            ],
        )?;
        Ok(())
    }

    fn insert_edge(&self, run_id: &str, edge: &LinkEdge) -> Result<()> {
        self.conn.execute(
            "INSERT INTO link_edges (run_id, source, target, anchor_text) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, &edge.source, &edge.target, &edge.anchor_text],
        )?;
        Ok(())
    }

    fn insert_missing(&self, run_id: &str, url: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO missing_pages (run_id, url) VALUES (?1, ?2)",
            params![run_id, url],
        )?;
        Ok(())
    }
}

impl RunStore for Database {
    fn create_run(&self, run: &CrawlJobRun) -> std::result::Result<(), PersistenceError> {
        self.insert_run(run)
            .map_err(|e| PersistenceError::new("create_run", e))
    }

    fn append_page(&self, run_id: &str, page: &PageRecord) -> std::result::Result<(), PersistenceError> {
        self.insert_page(run_id, page)
            .map_err(|e| PersistenceError::new("append_page", e))
    }

    fn append_edge(&self, run_id: &str, edge: &LinkEdge) -> std::result::Result<(), PersistenceError> {
        self.insert_edge(run_id, edge)
            .map_err(|e| PersistenceError::new("append_edge", e))
    }

    fn append_missing(&self, run_id: &str, url: &str) -> std::result::Result<(), PersistenceError> {
        self.insert_missing(run_id, url)
            .map_err(|e| PersistenceError::new("append_missing", e))
    }

    fn update_counts(&self, run: &CrawlJobRun) -> std::result::Result<(), PersistenceError> {
        self.store_run(run)
            .map_err(|e| PersistenceError::new("update_counts", e))
    }

    fn finish_run(&self, run: &CrawlJobRun) -> std::result::Result<(), PersistenceError> {
        self.store_run(run)
            .map_err(|e| PersistenceError::new("finish_run", e))
    }
}

fn job_from_row(row: &Row) -> Result<CrawlJobDefinition> {
    Ok(CrawlJobDefinition {
        job_type: row.get(0)?,
        seed_url: row.get(1)?,
        single_domain: row.get(2)?,
        subpath: row.get(3)?,
        page_limit: row.get::<_, i64>(4)? as usize,
        run_daily: row.get(5)?,
        keywords: from_json(row, 6)?,
    })
}

fn request_from_row(row: &Row) -> Result<JobRequest> {
    let status: String = row.get(3)?;
    Ok(JobRequest {
        id: row.get(0)?,
        job_type: row.get(1)?,
        queued_at: timestamp(row, 2)?,
        status: RequestStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Text,
                format!("unknown request status '{}'", status).into(),
            )
        })?,
    })
}

fn run_from_row(row: &Row) -> Result<CrawlJobRun> {
    let state: String = row.get(10)?;
    Ok(CrawlJobRun {
        run_id: row.get(0)?,
        job_type: row.get(1)?,
        queued_at: optional_timestamp(row, 2)?,
        started_at: timestamp(row, 3)?,
        ended_at: optional_timestamp(row, 4)?,
        elapsed_ms: row.get(5)?,
        counts: RunCounts {
            links: row.get::<_, i64>(6)? as usize,
            pages: row.get::<_, i64>(7)? as usize,
            missing: row.get::<_, i64>(8)? as usize,
            failed: row.get::<_, i64>(9)? as usize,
        },
        state: RunState::parse(&state).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                10,
                Type::Text,
                format!("unknown run state '{}'", state).into(),
            )
        })?,
        keywords: from_json(row, 11)?,
        tags: from_json(row, 12)?,
    })
}

fn timestamp(row: &Row, idx: usize) -> Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn optional_timestamp(row: &Row, idx: usize) -> Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(millis) => DateTime::from_timestamp_millis(millis)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis)),
        None => Ok(None),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn from_json<T: for<'de> Deserialize<'de>>(row: &Row, idx: usize) -> Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
