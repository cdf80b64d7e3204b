//! Bus abstraction for room fan-out.
//!
//! The relay never talks to a broker directly. It publishes client messages
//! to a room's topic and consumes one subscription stream per room through the
//! [`Bus`] trait. Delivery is at-most-once: a payload published while nobody
//! is subscribed to its topic is gone.
//!
//! # Backends
//!
//! - [`MemoryBus`]: in-process broadcast channels, for single-node deployments
//!   and tests
//! - [`ChaoticBus`]: fault-injecting wrapper around any other bus
//! - `RedisBus`: Redis pub/sub (requires the `redis` feature)

mod chaotic;
mod memory;
#[cfg(feature = "redis")]
mod redis_bus;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
pub use chaotic::ChaoticBus;
use chatrelay_proto::Topic;
use futures::{Stream, StreamExt, stream::BoxStream};
pub use memory::MemoryBus;
use thiserror::Error;

#[cfg(feature = "redis")]
pub use redis_bus::RedisBus;

/// Errors from bus operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Broker unreachable or rejected the operation.
    ///
    /// Transient. Publishes are dropped, subscriptions are retried.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// The subscription stream was terminated by the broker.
    #[error("subscription closed: {0}")]
    SubscriptionClosed(String),

    /// Backend-specific failure.
    #[error("bus backend error: {0}")]
    Backend(String),
}

/// Publish/subscribe primitive keyed by topic.
///
/// Must be Send + Sync: one instance is shared by every session (publishing)
/// and every room feed task (subscribing).
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Publish a payload to every current subscriber of `topic`.
    ///
    /// Succeeds even when there are no subscribers.
    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<(), BusError>;

    /// Open a subscription to `topic`.
    ///
    /// The returned stream yields payloads in broker order until it is dropped
    /// or the broker connection is lost.
    async fn subscribe(&self, topic: &Topic) -> Result<BusSubscription, BusError>;
}

/// A live subscription to one topic.
///
/// Dropping the subscription unsubscribes.
pub struct BusSubscription {
    topic: Topic,
    payloads: BoxStream<'static, Result<Bytes, BusError>>,
}

impl BusSubscription {
    /// Wrap a payload stream.
    pub fn new(
        topic: Topic,
        payloads: impl Stream<Item = Result<Bytes, BusError>> + Send + 'static,
    ) -> Self {
        Self { topic, payloads: payloads.boxed() }
    }

    /// Topic this subscription is attached to.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next payload. `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<Result<Bytes, BusError>> {
        self.payloads.next().await
    }
}

impl fmt::Debug for BusSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSubscription").field("topic", &self.topic).finish_non_exhaustive()
    }
}
