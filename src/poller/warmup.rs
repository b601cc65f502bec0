//! Cache warm-up — seeds the identity cache from stored history before the
//! first tick, so a restart does not re-deliver what was already relayed.

use std::time::Duration;

use tracing::{info, warn};

use super::cache::IdentityCache;
use crate::error::{DatabaseError, WarmupError};
use crate::store::ItemStore;

/// Warm-up parameters.
#[derive(Debug, Clone, Copy)]
pub struct WarmupConfig {
    /// Recency window for the primary query.
    pub window_days: u32,
    /// Number of most recent items used when the window is empty.
    pub fallback_count: usize,
    pub query_timeout: Duration,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            window_days: 10,
            fallback_count: 10,
            query_timeout: Duration::from_secs(30),
        }
    }
}

/// Which query ended up seeding the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupSource {
    Recency,
    Count,
    /// Nothing stored yet for this channel.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmupReport {
    pub source: WarmupSource,
    pub seeded: usize,
}

/// Seed `cache` from `store`: the recency window first, the most recent
/// `fallback_count` items if the window is empty.
///
/// Any query error is fatal; only an empty result triggers the fallback.
pub async fn warm_cache(
    store: &dyn ItemStore,
    channel: &str,
    config: &WarmupConfig,
    cache: &mut IdentityCache,
) -> Result<WarmupReport, WarmupError> {
    let query = store.read_by_recency(channel, config.window_days);
    let recent = bounded(config.query_timeout, query)
        .await
        .map_err(|source| WarmupError::Recency {
            window_days: config.window_days,
            source,
        })?;

    let (source, items) = if !recent.is_empty() {
        (WarmupSource::Recency, recent)
    } else {
        let query = store.read_by_count(channel, config.fallback_count);
        let last = bounded(config.query_timeout, query)
            .await
            .map_err(|source| WarmupError::Count {
                count: config.fallback_count,
                source,
            })?;
        if last.is_empty() {
            (WarmupSource::Empty, last)
        } else {
            (WarmupSource::Count, last)
        }
    };

    let seeded = cache.seed(items.iter().map(|item| item.id));

    match source {
        WarmupSource::Empty => warn!(
            channel,
            "No stored history; the first tick will relay every visible item"
        ),
        _ => info!(channel, source = ?source, seeded, "Identity cache warmed"),
    }

    Ok(WarmupReport { source, seeded })
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, DatabaseError>>,
) -> Result<T, DatabaseError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DatabaseError::Timeout(limit))?
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::feed::{Item, ItemId, ItemPayload};

    /// In-memory store with canned query answers.
    #[derive(Default)]
    struct CannedStore {
        recent: Vec<i64>,
        history: Vec<i64>,
        fail_recency: bool,
        fail_count: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    fn item(id: i64) -> Item {
        Item {
            id: ItemId(id),
            channel: "news".into(),
            timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000 + id, 0).unwrap(),
            payload: ItemPayload::default(),
        }
    }

    #[async_trait]
    impl ItemStore for CannedStore {
        async fn init_schema(&self) -> Result<(), DatabaseError> {
            Ok(())
        }

        async fn write_item(&self, _item: &Item) -> Result<(), DatabaseError> {
            Ok(())
        }

        async fn read_by_recency(
            &self,
            _channel: &str,
            _window_days: u32,
        ) -> Result<Vec<Item>, DatabaseError> {
            self.calls.lock().unwrap().push("recency");
            if self.fail_recency {
                return Err(DatabaseError::Query("connection refused".into()));
            }
            Ok(self.recent.iter().copied().map(item).collect())
        }

        async fn read_by_count(
            &self,
            _channel: &str,
            count: usize,
        ) -> Result<Vec<Item>, DatabaseError> {
            self.calls.lock().unwrap().push("count");
            if self.fail_count {
                return Err(DatabaseError::Query("connection refused".into()));
            }
            Ok(self.history.iter().copied().take(count).map(item).collect())
        }
    }

    #[tokio::test]
    async fn seeds_from_recency_window() {
        let store = CannedStore {
            recent: vec![12, 11, 10],
            history: vec![12, 11, 10, 9, 8],
            ..Default::default()
        };
        let mut cache = IdentityCache::new();

        let report = warm_cache(&store, "news", &WarmupConfig::default(), &mut cache)
            .await
            .unwrap();

        assert_eq!(report, WarmupReport { source: WarmupSource::Recency, seeded: 3 });
        assert!(cache.contains(ItemId(10)));
        assert!(!cache.contains(ItemId(9)));
        assert_eq!(*store.calls.lock().unwrap(), vec!["recency"]);
    }

    #[tokio::test]
    async fn falls_back_to_count_when_window_empty() {
        let store = CannedStore {
            history: (1..=25).rev().collect(),
            ..Default::default()
        };
        let mut cache = IdentityCache::new();

        let report = warm_cache(&store, "news", &WarmupConfig::default(), &mut cache)
            .await
            .unwrap();

        assert_eq!(report.source, WarmupSource::Count);
        assert_eq!(cache.len(), 10);
        assert!(cache.contains(ItemId(25)));
        assert!(cache.contains(ItemId(16)));
        assert!(!cache.contains(ItemId(15)));
    }

    #[tokio::test]
    async fn fallback_takes_what_is_available() {
        let store = CannedStore {
            history: vec![3, 2, 1],
            ..Default::default()
        };
        let mut cache = IdentityCache::new();

        warm_cache(&store, "news", &WarmupConfig::default(), &mut cache)
            .await
            .unwrap();

        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn empty_store_warms_empty() {
        let store = CannedStore::default();
        let mut cache = IdentityCache::new();

        let report = warm_cache(&store, "news", &WarmupConfig::default(), &mut cache)
            .await
            .unwrap();

        assert_eq!(report, WarmupReport { source: WarmupSource::Empty, seeded: 0 });
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn recency_error_is_fatal_without_fallback() {
        let store = CannedStore {
            history: vec![3, 2, 1],
            fail_recency: true,
            ..Default::default()
        };
        let mut cache = IdentityCache::new();

        let err = warm_cache(&store, "news", &WarmupConfig::default(), &mut cache)
            .await
            .unwrap_err();

        assert!(matches!(err, WarmupError::Recency { window_days: 10, .. }));
        assert_eq!(*store.calls.lock().unwrap(), vec!["recency"]);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn count_error_is_fatal() {
        let store = CannedStore {
            fail_count: true,
            ..Default::default()
        };
        let mut cache = IdentityCache::new();

        let err = warm_cache(&store, "news", &WarmupConfig::default(), &mut cache)
            .await
            .unwrap_err();

        assert!(matches!(err, WarmupError::Count { count: 10, .. }));
    }
}
