//! Error types for Channel Relay, one enum per concern.

use std::time::Duration;

use crate::feed::ItemId;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database call timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors from the source feed. All of them are transient from the
/// poller's point of view: the tick is abandoned and the next one retries.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Feed request failed: {0}")]
    Request(String),

    #[error("Feed {feed} returned HTTP {status}: {body}")]
    Status {
        feed: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode feed response: {0}")]
    Decode(String),

    #[error("Invalid feed record {id}: {reason}")]
    InvalidRecord { id: i64, reason: String },

    #[error("Feed call timed out after {0:?}")]
    Timeout(Duration),
}

/// Message bus errors.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to connect to broker: {0}")]
    Connect(String),

    #[error("Publish to {destination}/{routing_key} failed: {reason}")]
    Publish {
        destination: String,
        routing_key: String,
        reason: String,
    },

    #[error("Broker rejected batch for {destination}/{routing_key}")]
    Nacked {
        destination: String,
        routing_key: String,
    },

    #[error("Failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),
}

/// Schedule expression errors.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Cron expression '{0}' has no upcoming fire time")]
    Exhausted(String),
}

/// Fatal start-up error: the identity cache could not be seeded.
#[derive(Debug, thiserror::Error)]
pub enum WarmupError {
    #[error("recency query ({window_days} days) failed: {source}")]
    Recency {
        window_days: u32,
        #[source]
        source: DatabaseError,
    },

    #[error("count query ({count} items) failed: {source}")]
    Count {
        count: usize,
        #[source]
        source: DatabaseError,
    },
}

/// Failure of a single poll tick. Never fatal to the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FeedError),

    #[error("store write failed for item {id}: {source}")]
    StoreWrite {
        id: ItemId,
        #[source]
        source: DatabaseError,
    },

    #[error("publish failed after {stored} items were stored: {source}")]
    Publish {
        stored: usize,
        #[source]
        source: PublishError,
    },
}
