//! Room subscription manager.
//!
//! Keeps exactly one bus subscription per room that has (or had) a local
//! member. The first join of a room spawns a feed task that subscribes to the
//! room's topic and hands every payload to the [`Dispatcher`] in bus order.
//!
//! # Supervision
//!
//! Each feed task is awaited by a supervisor task. When the feed ends (retries
//! exhausted, panic, or abort) the supervisor removes the room's record, so
//! the next join starts a fresh subscription. Records carry a generation
//! number; a supervisor only removes the record it was spawned for.
//!
//! A feed that gives up or panics leaves its room without a subscription, so
//! the supervisor also evicts the room's members. Their clients reconnect and
//! the first rejoin subscribes again. A record already marked
//! [`SubscriptionState::Failed`] is replaced by the next join instead of
//! being waited out.
//!
//! Subscriptions are not torn down when a room empties. A room that was busy
//! once keeps its feed until the relay shuts down or the feed gives up.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use chatrelay_proto::{RoomName, Topic};
use tokio::{
    sync::watch,
    task::{AbortHandle, JoinHandle},
};

use crate::{
    bus::Bus,
    config::{ResubscribePolicy, TopicMode},
    dispatcher::Dispatcher,
    registry::ConnectionRegistry,
};

/// Lifecycle of one room's bus subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Feed task spawned, first subscribe not yet confirmed
    Starting,
    /// Subscribed and dispatching
    Active,
    /// Subscription lost, waiting to retry
    Retrying {
        /// Consecutive failed attempts so far
        attempt: u32,
    },
    /// Retries exhausted; the record is about to be removed and the room's
    /// members evicted
    Failed,
}

struct SubscriptionRecord {
    generation: u64,
    state: watch::Receiver<SubscriptionState>,
    feed: AbortHandle,
}

type Records = Arc<Mutex<HashMap<RoomName, SubscriptionRecord>>>;

/// Per-room subscription bookkeeping.
pub struct RoomSubscriptions {
    bus: Arc<dyn Bus>,
    dispatcher: Dispatcher,
    policy: ResubscribePolicy,
    topic_mode: TopicMode,
    records: Records,
    next_generation: AtomicU64,
}

impl RoomSubscriptions {
    /// Create a manager that subscribes through `bus` and dispatches through
    /// `dispatcher`.
    pub fn new(
        bus: Arc<dyn Bus>,
        dispatcher: Dispatcher,
        policy: ResubscribePolicy,
        topic_mode: TopicMode,
    ) -> Self {
        Self {
            bus,
            dispatcher,
            policy,
            topic_mode,
            records: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Make sure `room` has a running feed.
    ///
    /// Returns `true` only for the call that started a new subscription.
    /// Concurrent callers for the same room race on one mutex, so exactly one
    /// of them spawns the feed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ensure_subscribed(&self, room: &RoomName) -> bool {
        let (generation, handle) = {
            let mut records = lock(&self.records);
            if let Some(record) = records.get(room) {
                if *record.state.borrow() != SubscriptionState::Failed {
                    return false;
                }
                // Feed is on its way out; its supervisor sees the new
                // generation and leaves this record alone
                record.feed.abort();
            }

            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            let (state_tx, state_rx) = watch::channel(SubscriptionState::Starting);
            let feed = RoomFeed {
                room: room.clone(),
                topic: self.topic_mode.topic(room),
                bus: Arc::clone(&self.bus),
                dispatcher: self.dispatcher.clone(),
                policy: self.policy,
                state: state_tx,
            };
            let handle = tokio::spawn(feed.run());

            records.insert(
                room.clone(),
                SubscriptionRecord { generation, state: state_rx, feed: handle.abort_handle() },
            );
            (generation, handle)
        };

        tokio::spawn(supervise(
            Arc::clone(&self.records),
            Arc::clone(self.dispatcher.registry()),
            room.clone(),
            generation,
            handle,
        ));
        tracing::info!(%room, topic = %self.topic_mode.topic(room), "Room subscription started");
        true
    }

    /// Whether `room` currently has a feed.
    pub fn is_subscribed(&self, room: &RoomName) -> bool {
        lock(&self.records).contains_key(room)
    }

    /// Rooms with a feed.
    pub fn subscribed_rooms(&self) -> Vec<RoomName> {
        lock(&self.records).keys().cloned().collect()
    }

    /// Current subscription state of `room`, if it has a feed.
    pub fn state(&self, room: &RoomName) -> Option<SubscriptionState> {
        lock(&self.records).get(room).map(|record| *record.state.borrow())
    }

    /// Wait until `room`'s feed is subscribed.
    ///
    /// Returns `false` if the room has no feed or its feed ends first.
    pub async fn wait_until_active(&self, room: &RoomName) -> bool {
        let state = lock(&self.records).get(room).map(|record| record.state.clone());
        let Some(mut state) = state else {
            return false;
        };
        state.wait_for(|s| *s == SubscriptionState::Active).await.is_ok()
    }

    /// Abort every feed and forget all records.
    pub fn shutdown(&self) {
        let records: Vec<_> = lock(&self.records).drain().collect();
        for (room, record) in records {
            record.feed.abort();
            tracing::debug!(%room, "Room subscription stopped");
        }
    }
}

impl Drop for RoomSubscriptions {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock(records: &Records) -> MutexGuard<'_, HashMap<RoomName, SubscriptionRecord>> {
    records.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One room's subscribe/dispatch loop.
struct RoomFeed {
    room: RoomName,
    topic: Topic,
    bus: Arc<dyn Bus>,
    dispatcher: Dispatcher,
    policy: ResubscribePolicy,
    state: watch::Sender<SubscriptionState>,
}

impl RoomFeed {
    /// Runs until retries are exhausted. Returns the number of failed
    /// attempts.
    async fn run(self) -> u32 {
        let topic = &self.topic;
        let mut attempt = 0u32;

        loop {
            match self.bus.subscribe(topic).await {
                Ok(mut subscription) => {
                    attempt = 0;
                    self.state.send_replace(SubscriptionState::Active);
                    tracing::debug!(room = %self.room, %topic, "Subscribed");

                    loop {
                        match subscription.next().await {
                            Some(Ok(payload)) => {
                                self.dispatcher.dispatch(&self.room, &payload);
                            },
                            Some(Err(e)) => {
                                tracing::error!(room = %self.room, %topic, error = %e, "Subscription failed");
                                break;
                            },
                            None => {
                                tracing::error!(room = %self.room, %topic, "Subscription ended by bus");
                                break;
                            },
                        }
                    }
                },
                Err(e) => {
                    tracing::error!(room = %self.room, %topic, error = %e, "Subscribe failed");
                },
            }

            attempt = attempt.saturating_add(1);
            if attempt > self.policy.max_attempts {
                self.state.send_replace(SubscriptionState::Failed);
                return attempt - 1;
            }

            let delay = self.policy.backoff(attempt);
            self.state.send_replace(SubscriptionState::Retrying { attempt });
            tracing::info!(room = %self.room, attempt, ?delay, "Resubscribing");
            tokio::time::sleep(delay).await;
        }
    }
}

async fn supervise(
    records: Records,
    registry: Arc<ConnectionRegistry>,
    room: RoomName,
    generation: u64,
    feed: JoinHandle<u32>,
) {
    let stranded = match feed.await {
        Ok(attempts) => {
            tracing::error!(%room, attempts, "Room subscription gave up");
            true
        },
        Err(e) if e.is_panic() => {
            tracing::error!(%room, error = %e, "Room feed task panicked");
            true
        },
        Err(_) => {
            tracing::debug!(%room, "Room feed task aborted");
            false
        },
    };

    // Held across eviction so a concurrent join waits and then resubscribes
    let mut records = lock(&records);
    if !records.get(&room).is_some_and(|record| record.generation == generation) {
        return;
    }
    records.remove(&room);

    if stranded {
        let mut evicted = 0usize;
        for connection in registry.snapshot(&room) {
            if registry.evict(&connection) {
                evicted += 1;
            }
        }
        tracing::warn!(%room, evicted, "Room left without subscription, members evicted");
    }
}
