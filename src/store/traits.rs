//! `ItemStore` trait — durable history of relayed items.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::feed::Item;

/// Backend-agnostic persistence for feed items.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    /// Persist one item. Writing an item that is already stored is a no-op.
    async fn write_item(&self, item: &Item) -> Result<(), DatabaseError>;

    /// Items of `channel` posted within the last `window_days`, newest first.
    async fn read_by_recency(
        &self,
        channel: &str,
        window_days: u32,
    ) -> Result<Vec<Item>, DatabaseError>;

    /// The `count` most recent items of `channel`, newest first.
    async fn read_by_count(&self, channel: &str, count: usize) -> Result<Vec<Item>, DatabaseError>;
}
