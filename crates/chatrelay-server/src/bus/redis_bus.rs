//! Redis pub/sub bus.
//!
//! Publishes go through one shared multiplexed connection. Every subscription
//! opens its own pub/sub connection, since Redis dedicates a connection in
//! subscribe mode to receiving messages. Fan-out between relay processes is
//! Redis's job: every process subscribed to a topic receives every publish.

use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_proto::Topic;
use futures::StreamExt;
use redis::{AsyncCommands, aio::MultiplexedConnection};

use super::{Bus, BusError, BusSubscription};

/// Bus backed by a Redis server.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    publisher: MultiplexedConnection,
}

impl RedisBus {
    /// Connect to Redis at `url` (e.g. `redis://redis:6379`).
    ///
    /// Fails if the server is unreachable; the relay treats that as fatal at
    /// startup.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)
            .map_err(|e| BusError::Unavailable(format!("invalid redis url '{url}': {e}")))?;
        let publisher = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::Unavailable(format!("redis connect failed: {e}")))?;

        tracing::info!(url, "Connected to redis");

        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<(), BusError> {
        let mut conn = self.publisher.clone();
        let _receivers: i64 = conn
            .publish(topic.as_str(), payload.as_ref())
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> Result<BusSubscription, BusError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Unavailable(format!("redis pubsub connect failed: {e}")))?;
        pubsub
            .subscribe(topic.as_str())
            .await
            .map_err(|e| BusError::Backend(format!("redis subscribe failed: {e}")))?;

        let payloads = pubsub
            .into_on_message()
            .map(|msg| Ok(Bytes::copy_from_slice(msg.get_payload_bytes())));

        Ok(BusSubscription::new(topic.clone(), payloads))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let result = RedisBus::connect("redis://127.0.0.1:1").await;
        assert!(matches!(result, Err(BusError::Unavailable(_))));
    }

    #[tokio::test]
    async fn invalid_url_is_unavailable() {
        let result = RedisBus::connect("not a redis url").await;
        match result {
            Err(BusError::Unavailable(reason)) => assert!(reason.contains("invalid redis url")),
            Err(e) => panic!("expected Unavailable, got {e}"),
            Ok(_) => panic!("expected Unavailable, connect succeeded"),
        }
    }
}
