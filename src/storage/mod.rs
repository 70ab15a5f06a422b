//! Result store -- SQLite-backed record of every test run.

pub mod runs;
pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::Serialize;
use thiserror::Error;

pub use runs::SqliteStore;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create database directory {}", dir.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::builder()
        .max_size(2)
        .build(manager)
        .with_context(|| format!("failed to open database {}", path.display()))?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("result store unavailable: {0}")]
    Unavailable(String),

    #[error("test id {0} is already recorded")]
    WriteConflict(u32),
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// One completed test session as persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRun {
    pub test_id: u32,
    /// Local start time, `YYYY-MM-DD HH:MM:SS`.
    pub started_at: String,
    pub duration_secs: f64,
    pub success: bool,
}

impl std::fmt::Display for TestRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Test ID: {}", self.test_id)?;
        writeln!(f, "Start Time: {}", self.started_at)?;
        writeln!(f, "Duration: {:.6} seconds", self.duration_secs)?;
        write!(
            f,
            "Result: {}",
            if self.success { "Success" } else { "Failure" }
        )
    }
}

/// Text returned by [`ResultStore::lookup_run`] for an unknown id.
pub fn not_found_text(test_id: u32) -> String {
    format!("No record found for test ID {}.", test_id)
}

/// Persistence operations the session orchestrator and the CLI rely on.
pub trait ResultStore: Send + Sync {
    /// Next unused test id.
    fn allocate_id(&self) -> Result<u32, StoreError>;

    fn record_run(&self, run: &TestRun) -> Result<(), StoreError>;

    /// Human-readable record, or [`not_found_text`] when the id is unknown.
    fn lookup_run(&self, test_id: u32) -> Result<String, StoreError>;

    /// All runs as CSV, ordered by id.
    fn export_all(&self) -> Result<String, StoreError>;
}
