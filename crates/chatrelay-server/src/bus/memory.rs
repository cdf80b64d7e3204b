//! In-process bus backed by one tokio broadcast channel per topic.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_proto::Topic;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{Bus, BusError, BusSubscription};

/// In-memory bus for single-node deployments, testing and simulation.
///
/// Each topic owns a broadcast sender; every subscription holds its own
/// receiver. A subscriber that falls more than `capacity` payloads behind
/// skips the overflow (logged), matching the at-most-once contract. Clones
/// share the same topics, so one `MemoryBus` can back several relays in one
/// process.
///
/// A topic's channel is dropped once its last subscription goes away, so the
/// bus only holds state for topics someone is listening to.
///
/// Also counts publish and subscribe calls per topic so tests can assert that
/// the relay never opens duplicate subscriptions.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Mutex<MemoryBusInner>>,
    capacity: usize,
    publish_count: Arc<AtomicUsize>,
}

#[derive(Default)]
struct MemoryBusInner {
    /// Topic → live channel
    topics: HashMap<String, TopicChannel>,
    /// Topic → `subscribe` calls since the topic last had no subscribers
    subscribe_calls: HashMap<String, usize>,
    next_channel: u64,
}

struct TopicChannel {
    /// Tells a dropped subscription apart from one on a replacement channel
    /// after [`MemoryBus::close_topic`]
    id: u64,
    sender: broadcast::Sender<Bytes>,
}

/// Receiving end of one subscription. Prunes its topic on drop when it was
/// the last one.
struct TopicReceiver {
    receiver: Option<broadcast::Receiver<Bytes>>,
    topic: Topic,
    channel: u64,
    inner: Arc<Mutex<MemoryBusInner>>,
}

impl TopicReceiver {
    async fn recv(&mut self) -> Option<Bytes> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "Subscriber lagged, payloads dropped");
                },
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for TopicReceiver {
    fn drop(&mut self) {
        drop(self.receiver.take());

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = inner
            .topics
            .get(self.topic.as_str())
            .is_some_and(|channel| channel.id == self.channel && channel.sender.receiver_count() == 0);
        if idle {
            inner.topics.remove(self.topic.as_str());
            inner.subscribe_calls.remove(self.topic.as_str());
            tracing::trace!(topic = %self.topic, "Topic idle, channel dropped");
        }
    }
}

impl MemoryBus {
    /// Default per-topic channel capacity.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Create a bus with the default per-topic capacity.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Create a bus with an explicit per-topic capacity.
    ///
    /// A capacity of zero is bumped to one (broadcast channels require it).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryBusInner::default())),
            capacity: capacity.max(1),
            publish_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `subscribe` calls made for `topic` since it last had no
    /// subscribers.
    pub fn subscribe_calls(&self, topic: &Topic) -> usize {
        self.lock().subscribe_calls.get(topic.as_str()).copied().unwrap_or(0)
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.lock().topics.get(topic.as_str()).map_or(0, |channel| channel.sender.receiver_count())
    }

    /// Number of topics with a live channel.
    pub fn topic_count(&self) -> usize {
        self.lock().topics.len()
    }

    /// Total number of `publish` calls across all topics.
    pub fn publish_count(&self) -> usize {
        self.publish_count.load(Ordering::Relaxed)
    }

    /// Drop a topic's channel, ending every subscription on it.
    ///
    /// Simulates the broker dropping subscriptions. Returns `false` if the
    /// topic had no channel.
    pub fn close_topic(&self, topic: &Topic) -> bool {
        self.lock().topics.remove(topic.as_str()).is_some()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryBusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<(), BusError> {
        self.publish_count.fetch_add(1, Ordering::Relaxed);

        let sender = self.lock().topics.get(topic.as_str()).map(|channel| channel.sender.clone());
        if let Some(sender) = sender {
            // Err only means nobody is listening right now
            let _ = sender.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> Result<BusSubscription, BusError> {
        let receiver = {
            let mut inner = self.lock();
            *inner.subscribe_calls.entry(topic.as_str().to_string()).or_default() += 1;

            let next = inner.next_channel;
            let channel = inner.topics.entry(topic.as_str().to_string()).or_insert_with(|| {
                TopicChannel { id: next, sender: broadcast::channel(self.capacity).0 }
            });
            let (id, receiver) = (channel.id, channel.sender.subscribe());
            if id == next {
                inner.next_channel += 1;
            }

            TopicReceiver {
                receiver: Some(receiver),
                topic: topic.clone(),
                channel: id,
                inner: Arc::clone(&self.inner),
            }
        };

        let payloads = futures::stream::unfold(receiver, |mut receiver| async move {
            let payload = receiver.recv().await?;
            Some((Ok(payload), receiver))
        });

        Ok(BusSubscription::new(topic.clone(), payloads))
    }
}
