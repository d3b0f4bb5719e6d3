use rusqlite::{Connection, OptionalExtension, Result, params};
use salecrawl_scanner::{CrawlSummary, PageStore, ScanError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// SQLite-backed page record store.
///
/// The connection sits behind a mutex so fetch workers running on different
/// tasks can share one `Database` through `Arc<dyn PageStore>`.
pub struct Database {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub id: i64,
    pub url: String,
    pub matched: bool,
    pub fetched_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRun {
    pub id: i64,
    pub start_url: String,
    pub scope: String,
    pub status: RunStatus,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub rounds: i64,
    pub pages_fetched: i64,
    pub pages_matched: i64,
    pub pages_failed: i64,
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

impl Database {
    pub fn drop(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Workers write concurrently; keep commits cheap.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Database {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            "
            -- One row per successfully fetched page. No uniqueness on url.
            CREATE TABLE IF NOT EXISTS pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                matched BOOLEAN NOT NULL,
                fetched_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pages_url ON pages(url);
            CREATE INDEX IF NOT EXISTS idx_pages_matched ON pages(matched);

            -- Crawl run history, kept across runs
            CREATE TABLE IF NOT EXISTS crawl_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_url TEXT NOT NULL,
                scope TEXT NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed')),
                started_at INTEGER NOT NULL,
                finished_at INTEGER,
                rounds INTEGER NOT NULL DEFAULT 0,
                pages_fetched INTEGER NOT NULL DEFAULT 0,
                pages_matched INTEGER NOT NULL DEFAULT 0,
                pages_failed INTEGER NOT NULL DEFAULT 0
            );
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves the connection itself usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Page records
    pub fn insert_page(&self, url: &str, matched: bool) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO pages (url, matched, fetched_at) VALUES (?1, ?2, ?3)",
            params![url, matched, current_timestamp()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn clear_pages(&self) -> Result<usize> {
        let removed = self.conn().execute("DELETE FROM pages", [])?;
        debug!("Cleared {} page records", removed);
        Ok(removed)
    }

    pub fn get_pages(&self) -> Result<Vec<PageRecord>> {
        self.query_pages("SELECT id, url, matched, fetched_at FROM pages ORDER BY id")
    }

    pub fn get_matched_pages(&self) -> Result<Vec<PageRecord>> {
        self.query_pages(
            "SELECT id, url, matched, fetched_at FROM pages WHERE matched = 1 ORDER BY id",
        )
    }

    pub fn get_page_by_url(&self, url: &str) -> Result<Option<PageRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, url, matched, fetched_at FROM pages WHERE url = ?1 ORDER BY id LIMIT 1",
        )?;
        stmt.query_row(params![url], map_page).optional()
    }

    pub fn count_pages(&self) -> Result<i64> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))
    }

    pub fn count_matched(&self) -> Result<i64> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM pages WHERE matched = 1", [], |row| {
                row.get(0)
            })
    }

    fn query_pages(&self, sql: &str) -> Result<Vec<PageRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let pages = stmt
            .query_map([], map_page)?
            .collect::<Result<Vec<_>>>()?;
        Ok(pages)
    }

    // Run management
    pub fn create_run(&self, start_url: &str, scope: &str) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO crawl_runs (start_url, scope, status, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![start_url, scope, RunStatus::Running.as_str(), current_timestamp()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn complete_run(&self, run_id: i64, summary: &CrawlSummary) -> Result<()> {
        self.conn().execute(
            "UPDATE crawl_runs SET status = ?1, finished_at = ?2, scope = ?3, rounds = ?4,
                pages_fetched = ?5, pages_matched = ?6, pages_failed = ?7
             WHERE id = ?8",
            params![
                RunStatus::Completed.as_str(),
                current_timestamp(),
                summary.scope.to_string(),
                summary.rounds.len() as i64,
                summary.pages_fetched as i64,
                summary.pages_matched as i64,
                summary.pages_failed as i64,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn fail_run(&self, run_id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE crawl_runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![RunStatus::Failed.as_str(), current_timestamp(), run_id],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: i64) -> Result<Option<CrawlRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, start_url, scope, status, started_at, finished_at, rounds,
                    pages_fetched, pages_matched, pages_failed
             FROM crawl_runs WHERE id = ?1",
        )?;
        stmt.query_row(params![run_id], map_run).optional()
    }

    pub fn get_latest_run(&self) -> Result<Option<CrawlRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, start_url, scope, status, started_at, finished_at, rounds,
                    pages_fetched, pages_matched, pages_failed
             FROM crawl_runs ORDER BY id DESC LIMIT 1",
        )?;
        stmt.query_row([], map_run).optional()
    }
}

fn map_page(row: &rusqlite::Row<'_>) -> Result<PageRecord> {
    Ok(PageRecord {
        id: row.get(0)?,
        url: row.get(1)?,
        matched: row.get(2)?,
        fetched_at: row.get(3)?,
    })
}

fn map_run(row: &rusqlite::Row<'_>) -> Result<CrawlRun> {
    let status: String = row.get(3)?;
    Ok(CrawlRun {
        id: row.get(0)?,
        start_url: row.get(1)?,
        scope: row.get(2)?,
        status: RunStatus::parse(&status),
        started_at: row.get(4)?,
        finished_at: row.get(5)?,
        rounds: row.get(6)?,
        pages_fetched: row.get(7)?,
        pages_matched: row.get(8)?,
        pages_failed: row.get(9)?,
    })
}

impl PageStore for Database {
    fn clear_all(&self) -> salecrawl_scanner::error::Result<()> {
        self.clear_pages()
            .map(|_| ())
            .map_err(|e| ScanError::Store(e.to_string()))
    }

    fn save(&self, url: &str, matched: bool) -> salecrawl_scanner::error::Result<()> {
        self.insert_page(url, matched)
            .map(|_| ())
            .map_err(|e| ScanError::Store(e.to_string()))
    }
}
