//! Source reader — bounded newest-first scan with early termination.
//!
//! The feed is append-only and ordered by recency, so the first record
//! already known to the identity cache marks the boundary: everything
//! older was handled by an earlier tick.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, warn};

use super::{FeedClient, Item, ItemId};
use crate::error::FeedError;
use crate::poller::cache::IdentityCache;

/// When a newly seen id is recorded into the identity cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordPolicy {
    /// Record while scanning. A later store failure leaves the id marked
    /// as seen without being stored.
    OnScan,
    /// Record only after the item was written to the store.
    #[default]
    OnWrite,
}

impl FromStr for RecordPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_scan" => Ok(RecordPolicy::OnScan),
            "on_write" => Ok(RecordPolicy::OnWrite),
            other => Err(format!("unknown record policy: {other}")),
        }
    }
}

/// Pulls new items for one feed.
pub struct SourceReader {
    client: Arc<dyn FeedClient>,
    feed: String,
    pull_timeout: Duration,
    max_scan: Option<usize>,
}

impl SourceReader {
    pub fn new(
        client: Arc<dyn FeedClient>,
        feed: impl Into<String>,
        pull_timeout: Duration,
    ) -> Self {
        Self {
            client,
            feed: feed.into(),
            pull_timeout,
            max_scan: None,
        }
    }

    /// Cap the number of records inspected per scan.
    pub fn with_max_scan(mut self, max_scan: Option<usize>) -> Self {
        self.max_scan = max_scan;
        self
    }

    pub fn feed(&self) -> &str {
        &self.feed
    }

    /// Scan the feed from the newest record back to the first cached id.
    ///
    /// Returns the new items oldest first. With [`RecordPolicy::OnScan`]
    /// every collected id is recorded into `cache` as it is seen, and stays
    /// recorded if the scan later fails.
    pub async fn scan(
        &self,
        cache: &mut IdentityCache,
        policy: RecordPolicy,
    ) -> Result<Vec<Item>, FeedError> {
        let mut records = self.client.fetch_recent(&self.feed);
        let mut collected: Vec<Item> = Vec::new();
        let mut seen_this_scan: HashSet<ItemId> = HashSet::new();
        let mut inspected = 0usize;

        loop {
            if let Some(max) = self.max_scan
                && inspected >= max
            {
                warn!(
                    feed = %self.feed,
                    max_scan = max,
                    "Scan cap reached before a known item; older records skipped"
                );
                break;
            }

            let next = tokio::time::timeout(self.pull_timeout, records.next())
                .await
                .map_err(|_| FeedError::Timeout(self.pull_timeout))?;
            let Some(record) = next else {
                break;
            };
            inspected += 1;

            let item = Item::from_record(&self.feed, record?)?;
            if cache.contains(item.id) || !seen_this_scan.insert(item.id) {
                debug!(feed = %self.feed, id = %item.id, "Reached known item, stopping scan");
                break;
            }
            if policy == RecordPolicy::OnScan {
                cache.record(item.id);
            }
            collected.push(item);
        }

        collected.reverse();
        Ok(collected)
    }
}
