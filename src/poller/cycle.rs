//! Poll cycle — one tick of fetch → dedup → store → publish.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::cache::IdentityCache;
use crate::bus::Publisher;
use crate::error::{DatabaseError, PublishError, TickError};
use crate::feed::{RecordPolicy, SourceReader};
use crate::store::ItemStore;

/// Where batches go and how each tick behaves.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub destination: String,
    pub routing_key: String,
    pub record_policy: RecordPolicy,
    /// Upper bound for each store write and for the publish call.
    pub call_timeout: Duration,
}

/// Outcome of a successful tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick_id: Uuid,
    pub new_items: usize,
    pub stored: usize,
    pub published: bool,
    pub elapsed: Duration,
}

/// Owns the identity cache and everything a tick touches.
///
/// `run_tick` takes `&mut self`, so two ticks can never run at once.
pub struct PollCycle {
    reader: SourceReader,
    store: Arc<dyn ItemStore>,
    publisher: Arc<dyn Publisher>,
    cache: IdentityCache,
    config: PollConfig,
}

impl PollCycle {
    pub fn new(
        reader: SourceReader,
        store: Arc<dyn ItemStore>,
        publisher: Arc<dyn Publisher>,
        cache: IdentityCache,
        config: PollConfig,
    ) -> Self {
        Self {
            reader,
            store,
            publisher,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Run one tick.
    ///
    /// Store writes happen one item at a time, oldest first, and all of them
    /// complete before the single publish call. Any failure ends the tick
    /// without publishing.
    #[instrument(name = "tick", skip(self), fields(feed = %self.reader.feed()))]
    pub async fn run_tick(&mut self) -> Result<TickReport, TickError> {
        let tick_id = Uuid::new_v4();
        let started = Instant::now();
        let policy = self.config.record_policy;
        let limit = self.config.call_timeout;

        let items = self.reader.scan(&mut self.cache, policy).await?;

        if items.is_empty() {
            debug!(%tick_id, "No new items");
            return Ok(TickReport {
                tick_id,
                new_items: 0,
                stored: 0,
                published: false,
                elapsed: started.elapsed(),
            });
        }

        let mut stored = 0;
        for item in &items {
            tokio::time::timeout(limit, self.store.write_item(item))
                .await
                .map_err(|_| DatabaseError::Timeout(limit))
                .and_then(|r| r)
                .map_err(|source| TickError::StoreWrite {
                    id: item.id,
                    source,
                })?;
            if policy == RecordPolicy::OnWrite {
                self.cache.record(item.id);
            }
            stored += 1;
        }

        tokio::time::timeout(
            limit,
            self.publisher.publish_batch(
                &self.config.destination,
                &self.config.routing_key,
                &items,
            ),
        )
        .await
        .map_err(|_| PublishError::Timeout(limit))
        .and_then(|r| r)
        .map_err(|source| TickError::Publish { stored, source })?;

        let report = TickReport {
            tick_id,
            new_items: items.len(),
            stored,
            published: true,
            elapsed: started.elapsed(),
        };
        info!(
            %tick_id,
            new_items = report.new_items,
            first_id = %items[0].id,
            last_id = %items[items.len() - 1].id,
            cache_size = self.cache.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Relayed new items"
        );
        Ok(report)
    }
}
