//! AMQP publisher built on lapin.
//!
//! One batch becomes one persistent message whose body is the JSON array of
//! items. Publisher confirms are enabled, so a broker nack surfaces as an
//! error instead of being silently dropped. The connection is opened lazily
//! and re-opened on the next publish after it was lost.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::Publisher;
use crate::error::PublishError;
use crate::feed::Item;

/// Persistent delivery mode.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub vhost: String,
}

impl AmqpConfig {
    fn uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user.clone(),
                    password: self.password.expose_secret().to_string(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            ..Default::default()
        }
    }
}

struct Session {
    connection: Connection,
    channel: Channel,
}

/// Publishes item batches to an AMQP exchange.
pub struct AmqpPublisher {
    config: AmqpConfig,
    session: Mutex<Option<Session>>,
}

impl AmqpPublisher {
    /// Create a publisher without connecting yet.
    pub fn new(config: AmqpConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// Create a publisher and open the broker connection eagerly.
    pub async fn connect(config: AmqpConfig) -> Result<Self, PublishError> {
        let publisher = Self::new(config);
        publisher.channel().await?;
        Ok(publisher)
    }

    async fn open(&self) -> Result<Session, PublishError> {
        let connection = Connection::connect_uri(self.config.uri(), ConnectionProperties::default())
            .await
            .map_err(|e| PublishError::Connect(format!("amqp connect: {e}")))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| PublishError::Connect(format!("amqp channel: {e}")))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| PublishError::Connect(format!("amqp confirm_select: {e}")))?;

        info!(
            host = %self.config.host,
            port = self.config.port,
            vhost = %self.config.vhost,
            "AMQP connection established"
        );
        Ok(Session {
            connection,
            channel,
        })
    }

    /// Return an open channel, reconnecting if the previous one was lost.
    async fn channel(&self) -> Result<Channel, PublishError> {
        let mut session = self.session.lock().await;
        if let Some(current) = session.as_ref()
            && current.channel.status().connected()
        {
            return Ok(current.channel.clone());
        }
        if session.is_some() {
            warn!("AMQP channel lost, reconnecting");
        }
        let fresh = self.open().await?;
        let channel = fresh.channel.clone();
        *session = Some(fresh);
        Ok(channel)
    }

    async fn reset(&self) {
        self.session.lock().await.take();
    }

    /// Close the broker connection, if open.
    pub async fn close(&self) {
        if let Some(session) = self.session.lock().await.take()
            && let Err(e) = session.connection.close(200, "shutdown").await
        {
            warn!("Failed to close AMQP connection: {e}");
        }
    }
}

/// Encode a batch as the JSON message body.
fn encode_batch(items: &[Item]) -> Result<Vec<u8>, PublishError> {
    Ok(serde_json::to_vec(items)?)
}

#[async_trait]
impl Publisher for AmqpPublisher {
    #[instrument(level = "debug", skip(self, items), fields(batch = items.len()))]
    async fn publish_batch(
        &self,
        destination: &str,
        routing_key: &str,
        items: &[Item],
    ) -> Result<(), PublishError> {
        let body = encode_batch(items)?;
        let channel = self.channel().await?;

        let publish_err = |reason: String| PublishError::Publish {
            destination: destination.to_string(),
            routing_key: routing_key.to_string(),
            reason,
        };

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT);

        let confirmation = match channel
            .basic_publish(
                destination,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
        {
            Ok(pending) => pending.await,
            Err(e) => Err(e),
        };

        let confirmation = match confirmation {
            Ok(c) => c,
            Err(e) => {
                self.reset().await;
                return Err(publish_err(e.to_string()));
            }
        };

        if confirmation.is_nack() {
            return Err(PublishError::Nacked {
                destination: destination.to_string(),
                routing_key: routing_key.to_string(),
            });
        }

        debug!(destination, routing_key, bytes = body.len(), "Batch published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::feed::{ItemId, ItemPayload};

    fn config() -> AmqpConfig {
        AmqpConfig {
            host: "rabbit.internal".into(),
            port: 5673,
            user: "relay".into(),
            password: SecretString::from("p@ss/word"),
            vhost: "/".into(),
        }
    }

    #[test]
    fn uri_carries_credentials_and_vhost() {
        let uri = config().uri();
        assert_eq!(uri.authority.host, "rabbit.internal");
        assert_eq!(uri.authority.port, 5673);
        assert_eq!(uri.authority.userinfo.username, "relay");
        assert_eq!(uri.authority.userinfo.password, "p@ss/word");
        assert_eq!(uri.vhost, "/");
    }

    #[test]
    fn batch_body_is_json_array_in_order() {
        let items: Vec<Item> = [101, 102]
            .into_iter()
            .map(|id| Item {
                id: ItemId(id),
                channel: "news".into(),
                timestamp: DateTime::from_timestamp(1_700_000_000 + id, 0).unwrap(),
                payload: ItemPayload {
                    text: Some(format!("post {id}")),
                    ..Default::default()
                },
            })
            .collect();

        let body = encode_batch(&items).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let array = value.as_array().unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array[0]["id"], 101);
        assert_eq!(array[1]["id"], 102);
        assert_eq!(array[0]["payload"]["text"], "post 101");

        let decoded: Vec<Item> = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded, items);
    }

    #[tokio::test]
    async fn unreachable_broker_is_connect_error() {
        let publisher = AmqpPublisher::new(AmqpConfig {
            host: "127.0.0.1".into(),
            port: 1,
            ..config()
        });
        let err = publisher.publish_batch("x", "y", &[]).await.unwrap_err();
        assert!(matches!(err, PublishError::Connect(_)));
    }
}
