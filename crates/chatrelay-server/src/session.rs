//! Per-connection session state machine.
//!
//! ```text
//! Joining ──► Active ──► Closing ──► Closed
//! ```
//!
//! - `Joining`: the connection is registered and its room's subscription is
//!   ensured. Always proceeds to `Active`.
//! - `Active`: read, decode and publish client messages until the client goes
//!   away, a read fails, a malformed message arrives (unless skipped), or the
//!   relay closes the connection.
//! - `Closing`: deregister (idempotent) and close the connection, which stops
//!   the writer task.
//! - `Closed`: terminal.
//!
//! The outbound direction is handled by a separate writer task per connection
//! (see [`drive_writer`]), so a slow client socket never blocks its reader or
//! a room broadcast.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use chatrelay_proto::{ChatMessage, ProtocolError, RoomName, Topic};
use tokio::sync::mpsc;

use crate::{
    config::MalformedPolicy,
    connection::{Connection, ConnectionId},
    registry::ConnectionRegistry,
    relay::Relay,
    transport::{MessageReader, MessageWriter, TransportError},
};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Being registered
    Joining,
    /// Relaying client messages
    Active,
    /// Tearing down
    Closing,
    /// Terminal
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client closed the connection.
    ClientClosed,
    /// Reading from the client failed.
    ReadFailed(TransportError),
    /// Client sent a message that could not be decoded.
    Malformed(ProtocolError),
    /// The relay closed the connection (failed send or write, or shutdown).
    Evicted,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => f.write_str("client closed"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::Malformed(e) => write!(f, "malformed message: {e}"),
            Self::Evicted => f.write_str("evicted"),
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Connection the session drove
    pub id: ConnectionId,
    /// Room the connection was in
    pub room: RoomName,
    /// Final state (always [`SessionState::Closed`])
    pub state: SessionState,
    /// Why the session ended
    pub reason: CloseReason,
    /// Messages published to the bus
    pub published: u64,
    /// Messages dropped because the bus rejected them
    pub publish_failures: u64,
    /// Malformed messages skipped under [`MalformedPolicy::Skip`]
    pub skipped: u64,
}

/// Read side of one client connection.
pub struct Session<R> {
    relay: Arc<Relay>,
    connection: Arc<Connection>,
    topic: Topic,
    reader: R,
    state: SessionState,
    published: u64,
    publish_failures: u64,
    skipped: u64,
}

impl<R: MessageReader> Session<R> {
    pub(crate) fn new(relay: Arc<Relay>, connection: Arc<Connection>, reader: R) -> Self {
        let topic = relay.config().topic_mode.topic(connection.room());
        Self {
            relay,
            connection,
            topic,
            reader,
            state: SessionState::Joining,
            published: 0,
            publish_failures: 0,
            skipped: 0,
        }
    }

    /// Register the connection and ensure its room is subscribed.
    ///
    /// On a relay that is shutting down the connection is closed instead, so
    /// [`Session::run`] ends right away with [`CloseReason::Evicted`].
    pub(crate) fn join(&mut self) {
        debug_assert_eq!(self.state, SessionState::Joining);
        self.state = SessionState::Active;

        if self.relay.is_shut_down() {
            self.connection.close();
            tracing::debug!(conn_id = %self.connection.id(), "Relay shut down, join refused");
            return;
        }

        self.relay.registry().add(Arc::clone(&self.connection));
        self.relay.subscriptions().ensure_subscribed(self.connection.room());

        // Shutdown may have drained both before we registered
        if self.relay.is_shut_down() {
            self.relay.registry().evict(&self.connection);
            self.relay.subscriptions().shutdown();
            tracing::debug!(conn_id = %self.connection.id(), "Relay shut down during join");
            return;
        }

        tracing::info!(
            conn_id = %self.connection.id(),
            room = %self.connection.room(),
            remote_addr = self.connection.remote_addr(),
            "Client joined"
        );
    }

    /// Connection this session drives.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Relay client messages until the session ends.
    pub async fn run(mut self) -> SessionOutcome {
        if self.state == SessionState::Joining {
            self.join();
        }

        let reason = loop {
            let read = tokio::select! {
                biased;
                () = self.connection.closed() => break CloseReason::Evicted,
                read = self.reader.read_message() => read,
            };

            match read {
                Ok(bytes) => {
                    if let Some(reason) = self.handle_message(&bytes).await {
                        break reason;
                    }
                },
                Err(TransportError::Closed) => break CloseReason::ClientClosed,
                Err(e) => break CloseReason::ReadFailed(e),
            }
        };

        self.close(reason)
    }

    async fn handle_message(&mut self, bytes: &Bytes) -> Option<CloseReason> {
        let max_size = self.relay.config().max_message_size;
        let message = match ChatMessage::decode_bounded(bytes, max_size) {
            Ok(message) => message,
            Err(e) => match self.relay.config().malformed_policy {
                MalformedPolicy::Disconnect => {
                    tracing::warn!(conn_id = %self.connection.id(), error = %e, "Malformed message, disconnecting");
                    return Some(CloseReason::Malformed(e));
                },
                MalformedPolicy::Skip => {
                    self.skipped += 1;
                    tracing::warn!(conn_id = %self.connection.id(), error = %e, "Malformed message skipped");
                    return None;
                },
            },
        };

        match self.relay.bus().publish(&self.topic, message.to_broadcast_payload()).await {
            Ok(()) => {
                self.published += 1;
                tracing::trace!(conn_id = %self.connection.id(), topic = %self.topic, "Published");
            },
            Err(e) => {
                self.publish_failures += 1;
                tracing::warn!(
                    conn_id = %self.connection.id(),
                    topic = %self.topic,
                    error = %e,
                    "Publish failed, message dropped"
                );
            },
        }
        None
    }

    fn close(mut self, reason: CloseReason) -> SessionOutcome {
        self.state = SessionState::Closing;
        self.relay.registry().evict(&self.connection);
        self.state = SessionState::Closed;

        tracing::info!(
            conn_id = %self.connection.id(),
            room = %self.connection.room(),
            %reason,
            published = self.published,
            "Client left"
        );

        SessionOutcome {
            id: self.connection.id(),
            room: self.connection.room().clone(),
            state: self.state,
            reason,
            published: self.published,
            publish_failures: self.publish_failures,
            skipped: self.skipped,
        }
    }
}

/// Drain a connection's outbound queue into its transport.
///
/// Runs until the connection is closed or a write fails. A failed write
/// evicts the connection, which also ends its session. The transport is
/// closed on the way out; close errors are only logged.
pub(crate) async fn drive_writer<W: MessageWriter>(
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    mut outbound: mpsc::Receiver<Bytes>,
    mut writer: W,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = connection.closed() => break,
            next = outbound.recv() => next,
        };
        let Some(payload) = next else {
            break;
        };

        if let Err(e) = writer.write_message(payload).await {
            if registry.evict(&connection) {
                tracing::warn!(
                    conn_id = %connection.id(),
                    room = %connection.room(),
                    error = %e,
                    "Write failed, connection evicted"
                );
            }
            break;
        }
    }

    if let Err(e) = writer.close().await {
        tracing::debug!(conn_id = %connection.id(), error = %e, "Transport close failed");
    }
}
