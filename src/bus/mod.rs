//! Message bus — the push side of the relay.

pub mod amqp;

use async_trait::async_trait;

use crate::error::PublishError;
use crate::feed::Item;

pub use amqp::{AmqpConfig, AmqpPublisher};

/// Fire-and-forget batch publisher.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `items` as one batch to `destination` under `routing_key`.
    async fn publish_batch(
        &self,
        destination: &str,
        routing_key: &str,
        items: &[Item],
    ) -> Result<(), PublishError>;
}
