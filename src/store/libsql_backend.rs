//! libSQL backend — async `ItemStore` implementation.
//!
//! Supports local file, in-memory and remote (libSQL server) databases.
//! Timestamps are stored as unix seconds so recency windows compare
//! numerically.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::feed::{Item, ItemId, ItemPayload};
use crate::store::migrations;
use crate::store::traits::ItemStore;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Connect to a remote libSQL server and run migrations.
    pub async fn new_remote(url: &str, auth_token: &SecretString) -> Result<Self, DatabaseError> {
        let token = auth_token.expose_secret().to_string();
        let db = libsql::Builder::new_remote(url.to_string(), token)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to connect to {url}: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(url, "Remote database connected");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_items(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Item>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut items = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            items.push(row_to_item(&row)?);
        }
        Ok(items)
    }
}

// ── Helper functions ────────────────────────────────────────────────

const ITEM_COLUMNS: &str = "channel, id, posted_at, payload";

/// Map a libsql Row to an Item.
///
/// Column order matches ITEM_COLUMNS. A payload that no longer parses is
/// replaced by an empty one: callers mostly need the id.
fn row_to_item(row: &libsql::Row) -> Result<Item, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let channel: String = row.get(0).map_err(parse)?;
    let id: i64 = row.get(1).map_err(parse)?;
    let posted_at: i64 = row.get(2).map_err(parse)?;
    let payload_str: String = row.get(3).map_err(parse)?;

    let payload: ItemPayload = serde_json::from_str(&payload_str).unwrap_or_else(|e| {
        warn!(channel = %channel, id, "Unreadable stored payload: {e}");
        ItemPayload::default()
    });

    Ok(Item {
        id: ItemId(id),
        channel,
        timestamp: DateTime::from_timestamp(posted_at, 0).unwrap_or(DateTime::<Utc>::MIN_UTC),
        payload,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl ItemStore for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await.map(|_| ())
    }

    async fn write_item(&self, item: &Item) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(&item.payload)
            .map_err(|e| DatabaseError::Serialization(format!("item {}: {e}", item.id)))?;

        let inserted = self
            .conn()
            .execute(
                "INSERT INTO items (channel, id, posted_at, payload, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(channel, id) DO NOTHING",
                params![
                    item.channel.as_str(),
                    item.id.0,
                    item.timestamp.timestamp(),
                    payload,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("write_item: {e}")))?;

        if inserted == 0 {
            debug!(channel = %item.channel, id = %item.id, "Item already stored");
        } else {
            debug!(channel = %item.channel, id = %item.id, "Item stored");
        }
        Ok(())
    }

    async fn read_by_recency(
        &self,
        channel: &str,
        window_days: u32,
    ) -> Result<Vec<Item>, DatabaseError> {
        let cutoff = (Utc::now() - chrono::Duration::days(i64::from(window_days))).timestamp();
        self.query_items(
            "read_by_recency",
            &format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE channel = ?1 AND posted_at >= ?2 ORDER BY id DESC"
            ),
            params![channel, cutoff],
        )
        .await
    }

    async fn read_by_count(&self, channel: &str, count: usize) -> Result<Vec<Item>, DatabaseError> {
        // A negative LIMIT means "no limit" to SQLite.
        let limit = i64::try_from(count)
            .map_err(|_| DatabaseError::Query(format!("read_by_count: count {count} too large")))?;
        self.query_items(
            "read_by_count",
            &format!("SELECT {ITEM_COLUMNS} FROM items WHERE channel = ?1 ORDER BY id DESC LIMIT ?2"),
            params![channel, limit],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_item(channel: &str, id: i64, age_days: i64) -> Item {
        Item {
            id: ItemId(id),
            channel: channel.to_string(),
            timestamp: DateTime::from_timestamp(
                (Utc::now() - chrono::Duration::days(age_days)).timestamp(),
                0,
            )
            .unwrap(),
            payload: ItemPayload {
                text: Some(format!("post {id}")),
                views: Some(id * 10),
                ..Default::default()
            },
        }
    }

    fn ids(items: &[Item]) -> Vec<i64> {
        items.iter().map(|i| i.id.0).collect()
    }

    #[tokio::test]
    async fn write_and_read_back() {
        let db = test_db().await;
        let item = make_item("news", 1, 0);
        db.write_item(&item).await.unwrap();

        let items = db.read_by_count("news", 10).await.unwrap();
        assert_eq!(items, vec![item]);
    }

    #[tokio::test]
    async fn duplicate_write_is_noop() {
        let db = test_db().await;
        let item = make_item("news", 5, 0);
        db.write_item(&item).await.unwrap();
        db.write_item(&item).await.unwrap();

        assert_eq!(db.read_by_count("news", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn read_by_count_newest_first_and_limited() {
        let db = test_db().await;
        for id in 1..=5 {
            db.write_item(&make_item("news", id, 0)).await.unwrap();
        }

        let items = db.read_by_count("news", 3).await.unwrap();
        assert_eq!(ids(&items), vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn read_by_recency_respects_window() {
        let db = test_db().await;
        db.write_item(&make_item("news", 1, 30)).await.unwrap();
        db.write_item(&make_item("news", 2, 12)).await.unwrap();
        db.write_item(&make_item("news", 3, 2)).await.unwrap();
        db.write_item(&make_item("news", 4, 0)).await.unwrap();

        let items = db.read_by_recency("news", 10).await.unwrap();
        assert_eq!(ids(&items), vec![4, 3]);
    }

    #[tokio::test]
    async fn reads_are_scoped_to_channel() {
        let db = test_db().await;
        db.write_item(&make_item("news", 1, 0)).await.unwrap();
        db.write_item(&make_item("other", 2, 0)).await.unwrap();

        assert_eq!(ids(&db.read_by_count("news", 10).await.unwrap()), vec![1]);
        assert_eq!(ids(&db.read_by_recency("other", 10).await.unwrap()), vec![2]);
    }

    #[tokio::test]
    async fn same_id_in_two_channels() {
        let db = test_db().await;
        db.write_item(&make_item("news", 1, 0)).await.unwrap();
        db.write_item(&make_item("other", 1, 0)).await.unwrap();

        assert_eq!(db.read_by_count("news", 10).await.unwrap().len(), 1);
        assert_eq!(db.read_by_count("other", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_count_is_rejected() {
        let db = test_db().await;
        db.write_item(&make_item("news", 1, 0)).await.unwrap();

        let err = db.read_by_count("news", usize::MAX).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Query(msg) if msg.contains("too large")));
    }

    #[tokio::test]
    async fn empty_store_reads_empty() {
        let db = test_db().await;
        assert!(db.read_by_recency("news", 10).await.unwrap().is_empty());
        assert!(db.read_by_count("news", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_payload_keeps_id() {
        let db = test_db().await;
        db.conn()
            .execute(
                "INSERT INTO items (channel, id, posted_at, payload, stored_at)
                 VALUES ('news', 9, 1700000000, 'not json', '2026-01-01T00:00:00Z')",
                (),
            )
            .await
            .unwrap();

        let items = db.read_by_count("news", 1).await.unwrap();
        assert_eq!(items[0].id, ItemId(9));
        assert_eq!(items[0].payload, ItemPayload::default());
    }

    #[tokio::test]
    async fn new_local_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("dir").join("relay.db");
        let db = LibSqlBackend::new_local(&db_path).await.unwrap();
        db.write_item(&make_item("news", 1, 0)).await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn local_file_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("relay.db");
        {
            let db = LibSqlBackend::new_local(&db_path).await.unwrap();
            db.write_item(&make_item("news", 11, 0)).await.unwrap();
        }
        let db = LibSqlBackend::new_local(&db_path).await.unwrap();
        assert_eq!(ids(&db.read_by_count("news", 5).await.unwrap()), vec![11]);
    }
}
