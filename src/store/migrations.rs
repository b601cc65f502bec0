//! Schema migrations for the item store.
//!
//! Applied versions are tracked in `_migrations`. Each pending step runs in
//! its own transaction together with its bookkeeping row, so a failed step
//! leaves the schema at the previous version.

use libsql::{Connection, params};
use tracing::{debug, info};

use crate::error::DatabaseError;

struct Step {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered schema history. Only ever append.
const STEPS: &[Step] = &[Step {
    version: 1,
    name: "items",
    sql: "
        CREATE TABLE IF NOT EXISTS items (
            channel   TEXT    NOT NULL,
            id        INTEGER NOT NULL,
            posted_at INTEGER NOT NULL,
            payload   TEXT    NOT NULL,
            stored_at TEXT    NOT NULL,
            PRIMARY KEY (channel, id)
        );
        CREATE INDEX IF NOT EXISTS idx_items_channel_posted_at
            ON items(channel, posted_at);
    ",
}];

/// Highest schema version this build knows about.
pub fn latest_version() -> i64 {
    STEPS.last().map_or(0, |step| step.version)
}

/// Bring the schema up to [`latest_version`]. Returns how many steps ran.
///
/// A database written by a newer build is refused rather than used with a
/// schema this code does not understand.
pub async fn run_migrations(conn: &Connection) -> Result<usize, DatabaseError> {
    let fail = |what: &str, e: libsql::Error| DatabaseError::Migration(format!("{what}: {e}"));

    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| fail("create _migrations", e))?;

    let current = schema_version(conn).await?;
    if current > latest_version() {
        return Err(DatabaseError::Migration(format!(
            "database is at schema V{current}, this build only knows up to V{}",
            latest_version()
        )));
    }

    let mut applied = 0;
    for step in STEPS.iter().filter(|step| step.version > current) {
        let tx = conn
            .transaction()
            .await
            .map_err(|e| fail("begin migration", e))?;
        tx.execute_batch(step.sql)
            .await
            .map_err(|e| fail(&format!("V{} {}", step.version, step.name), e))?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            params![step.version, step.name],
        )
        .await
        .map_err(|e| fail(&format!("record V{}", step.version), e))?;
        tx.commit()
            .await
            .map_err(|e| fail(&format!("commit V{}", step.version), e))?;

        info!(version = step.version, name = step.name, "Applied schema migration");
        applied += 1;
    }

    debug!(version = latest_version(), applied, "Schema up to date");
    Ok(applied)
}

/// Highest applied version, 0 for a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("read schema version: {e}")))?;

    let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("read schema version: {e}")))?
    else {
        return Ok(0);
    };
    row.get(0)
        .map_err(|e| DatabaseError::Migration(format!("parse schema version: {e}")))
}
