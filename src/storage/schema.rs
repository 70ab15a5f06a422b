//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;
use tracing::warn;

/// Run all pending migrations.
///
/// `test_logs` keeps the column layout older tester databases already use, so
/// an existing `records.db` opens unchanged. Those databases may already hold
/// repeated test ids; the unique index is then left out and `record_run`
/// checks for an existing id before inserting.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS test_logs (
            test_id INTEGER,
            timestamp TEXT,
            duration REAL,
            result INTEGER
        );",
    )?;

    let duplicated = duplicated_test_ids(conn)?;
    if duplicated.is_empty() {
        conn.execute_batch(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_test_logs_test_id ON test_logs(test_id);",
        )?;
    } else {
        warn!(
            ?duplicated,
            "test_logs holds repeated test ids, skipping unique index"
        );
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_test_logs_test_id_lookup ON test_logs(test_id);",
        )?;
    }

    conn.execute_batch("INSERT OR IGNORE INTO schema_version (version) VALUES (1);")?;

    Ok(())
}

fn duplicated_test_ids(conn: &Connection) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT test_id FROM test_logs WHERE test_id IS NOT NULL
         GROUP BY test_id HAVING COUNT(*) > 1 ORDER BY test_id",
    )?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}
