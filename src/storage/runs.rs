use std::fmt::Write as _;

use rusqlite::{params, ErrorCode, OptionalExtension};
use tracing::debug;

use super::{not_found_text, Pool, ResultStore, StoreError, TestRun};

/// [`ResultStore`] over the `test_logs` table.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn find_run(&self, test_id: u32) -> Result<Option<TestRun>, StoreError> {
        let conn = self.pool.get()?;
        let run = conn
            .query_row(
                "SELECT test_id, timestamp, duration, result FROM test_logs WHERE test_id = ?1",
                params![test_id],
                row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    pub fn list_runs(&self) -> Result<Vec<TestRun>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT test_id, timestamp, duration, result FROM test_logs ORDER BY test_id ASC",
        )?;
        let runs = stmt
            .query_map([], row_to_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<TestRun> {
    Ok(TestRun {
        test_id: row.get(0)?,
        started_at: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        duration_secs: row.get::<_, Option<f64>>(2)?.unwrap_or_default(),
        success: row.get::<_, Option<i64>>(3)?.unwrap_or(0) != 0,
    })
}

impl ResultStore for SqliteStore {
    fn allocate_id(&self) -> Result<u32, StoreError> {
        let conn = self.pool.get()?;
        let max: Option<u32> =
            conn.query_row("SELECT MAX(test_id) FROM test_logs", [], |row| row.get(0))?;
        let next = match max {
            Some(id) => id
                .checked_add(1)
                .ok_or_else(|| StoreError::Unavailable("test id space exhausted".to_string()))?,
            None => 1,
        };
        debug!(test_id = next, "allocated test id");
        Ok(next)
    }

    fn record_run(&self, run: &TestRun) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        // Legacy databases with repeated ids carry no unique index.
        let taken = conn
            .query_row(
                "SELECT 1 FROM test_logs WHERE test_id = ?1 LIMIT 1",
                params![run.test_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if taken {
            return Err(StoreError::WriteConflict(run.test_id));
        }
        conn.execute(
            "INSERT INTO test_logs (test_id, timestamp, duration, result) VALUES (?1, ?2, ?3, ?4)",
            params![run.test_id, run.started_at, run.duration_secs, run.success as i64],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::WriteConflict(run.test_id)
            }
            other => StoreError::from(other),
        })?;
        debug!(test_id = run.test_id, success = run.success, "test run recorded");
        Ok(())
    }

    fn lookup_run(&self, test_id: u32) -> Result<String, StoreError> {
        Ok(match self.find_run(test_id)? {
            Some(run) => run.to_string(),
            None => not_found_text(test_id),
        })
    }

    fn export_all(&self) -> Result<String, StoreError> {
        let mut out = String::from("test_id, timestamp, duration, result\n");
        for run in self.list_runs()? {
            // Writing to a String cannot fail.
            let _ = writeln!(
                out,
                "{},{},{:.6},{}",
                run.test_id, run.started_at, run.duration_secs, run.success as u8
            );
        }
        Ok(out)
    }
}
