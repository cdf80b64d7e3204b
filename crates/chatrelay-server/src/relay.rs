//! The relay: one registry, one subscription manager, one bus handle.
//!
//! [`Relay`] is the entry point transports call. Each accepted client becomes
//! a [`Session`] (read side) plus a writer task (write side); the relay wires
//! both to the shared registry and makes sure the client's room is
//! subscribed.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use chatrelay_proto::{ChatMessage, RoomName};

use crate::{
    bus::{Bus, BusError},
    config::RelayConfig,
    connection::{Connection, ConnectionId},
    dispatcher::Dispatcher,
    registry::ConnectionRegistry,
    session::{Session, SessionOutcome, drive_writer},
    subscriptions::RoomSubscriptions,
    transport::{MessageReader, MessageWriter},
};

/// Room-scoped fan-out relay.
pub struct Relay {
    bus: Arc<dyn Bus>,
    registry: Arc<ConnectionRegistry>,
    subscriptions: RoomSubscriptions,
    config: RelayConfig,
    next_connection_id: AtomicU64,
    shut_down: AtomicBool,
}

impl Relay {
    /// Create a relay on top of `bus`.
    pub fn new(bus: Arc<dyn Bus>, config: RelayConfig) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let subscriptions =
            RoomSubscriptions::new(Arc::clone(&bus), dispatcher, config.resubscribe, config.topic_mode);

        Arc::new(Self {
            bus,
            registry,
            subscriptions,
            config,
            next_connection_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Shared bus handle.
    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    /// Live connections.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Room subscriptions.
    pub fn subscriptions(&self) -> &RoomSubscriptions {
        &self.subscriptions
    }

    /// Relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Whether [`Relay::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Admit a client into `room`.
    ///
    /// Spawns the connection's writer task, registers the connection and
    /// ensures the room's subscription. The returned session is `Active`;
    /// drive it with [`Session::run`]. After [`Relay::shutdown`] the client
    /// is not registered and its session ends as soon as it runs.
    pub fn join<R, W>(
        self: &Arc<Self>,
        room: RoomName,
        remote_addr: impl Into<String>,
        reader: R,
        writer: W,
    ) -> Session<R>
    where
        R: MessageReader,
        W: MessageWriter + 'static,
    {
        let id = ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let (connection, outbound) =
            Connection::new(id, room, remote_addr, self.config.outbound_capacity);
        let connection = Arc::new(connection);

        tokio::spawn(drive_writer(
            Arc::clone(&connection),
            Arc::clone(&self.registry),
            outbound,
            writer,
        ));

        let mut session = Session::new(Arc::clone(self), connection, reader);
        session.join();
        session
    }

    /// Admit a client and run its session to completion.
    pub async fn serve<R, W>(
        self: &Arc<Self>,
        room: RoomName,
        remote_addr: impl Into<String>,
        reader: R,
        writer: W,
    ) -> SessionOutcome
    where
        R: MessageReader,
        W: MessageWriter + 'static,
    {
        self.join(room, remote_addr, reader, writer).run().await
    }

    /// Publish a message to `room` on behalf of the server itself.
    pub async fn publish(&self, room: &RoomName, message: &ChatMessage) -> Result<(), BusError> {
        self.bus.publish(&self.config.topic_mode.topic(room), message.to_broadcast_payload()).await
    }

    /// Stop all room feeds and close every connection.
    ///
    /// Joins that race with or follow this call are refused.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.subscriptions.shutdown();

        let mut closed = 0usize;
        for room in self.registry.rooms() {
            for connection in self.registry.snapshot(&room) {
                if self.registry.evict(&connection) {
                    closed += 1;
                }
            }
        }
        tracing::info!(closed, "Relay shut down");
    }
}
