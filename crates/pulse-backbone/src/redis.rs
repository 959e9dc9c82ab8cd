//! Redis pub/sub transport.
//!
//! Publishes ride a [`redis::aio::ConnectionManager`], which transparently
//! reconnects. Subscriptions use a dedicated pub/sub connection; when it
//! dies the stream ends and the bus resubscribes with backoff.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::error::BackboneError;
use crate::transport::{BackboneMessage, BackboneStream, BackboneTransport};

/// Redis-backed backbone transport.
pub struct RedisTransport {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisTransport {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, BackboneError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        debug!(url, "redis backbone transport connected");
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl BackboneTransport for RedisTransport {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BackboneError> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(topic, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<BackboneStream, BackboneError> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| BackboneError::Subscribe(e.to_string()))?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .psubscribe(pattern)
            .await
            .map_err(|e| BackboneError::Subscribe(e.to_string()))?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                let topic = msg.get_channel_name().to_owned();
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(BackboneMessage { topic, payload }),
                    Err(err) => {
                        tracing::warn!(error = %err, topic, "non-UTF8 backbone payload dropped");
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Live Redis behavior is exercised by deployment smoke tests; here we
    // only verify the connect error path without a server.

    #[tokio::test]
    async fn connect_to_invalid_url_fails() {
        let result = RedisTransport::connect("not-a-redis-url").await;
        assert!(result.is_err());
    }
}
