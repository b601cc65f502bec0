//! Source feed abstraction — the pull side of the relay.

pub mod http;
pub mod model;
pub mod reader;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::FeedError;

pub use http::{HttpFeedClient, HttpFeedConfig};
pub use model::{Attachment, Item, ItemId, ItemPayload, RawRecord};
pub use reader::{RecordPolicy, SourceReader};

/// Lazy, newest-first sequence of raw records.
///
/// Dropping the stream stops any further requests to the feed.
pub type RecordStream<'a> = BoxStream<'a, Result<RawRecord, FeedError>>;

/// Client for an external feed of time-ordered records.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Stream the feed's records, newest first.
    fn fetch_recent<'a>(&'a self, feed: &'a str) -> RecordStream<'a>;

    /// Check that the feed is reachable with the configured credentials.
    async fn health_check(&self, _feed: &str) -> Result<(), FeedError> {
        Ok(())
    }
}
