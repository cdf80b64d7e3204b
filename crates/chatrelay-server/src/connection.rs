//! Live client connections.
//!
//! A [`Connection`] is the registry-facing half of a client: identity, room,
//! and a bounded outbound queue drained by the connection's writer task. The
//! transport itself is owned by the session (read half) and the writer task
//! (write half), never by the registry.

use std::fmt;

use bytes::Bytes;
use chatrelay_proto::RoomName;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Process-unique connection identity.
///
/// Allocated from a monotonic counter, so no two connections in one process
/// ever compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why an outbound send failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// Outbound queue full: the client is not keeping up.
    #[error("outbound queue full")]
    Full,

    /// Connection closed or its writer task is gone.
    #[error("connection closed")]
    Closed,
}

/// Registry-facing handle of one client connection.
pub struct Connection {
    id: ConnectionId,
    room: RoomName,
    remote_addr: String,
    outbound: mpsc::Sender<Bytes>,
    closed: watch::Sender<bool>,
}

impl Connection {
    /// Create a connection with an outbound queue of `capacity` payloads.
    ///
    /// Returns the receiving end of the queue for the writer task.
    pub fn new(
        id: ConnectionId,
        room: RoomName,
        remote_addr: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        let conn = Self { id, room, remote_addr: remote_addr.into(), outbound, closed };
        (conn, receiver)
    }

    /// Connection identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Room this connection joined.
    pub fn room(&self) -> &RoomName {
        &self.room
    }

    /// Remote peer address (diagnostic only).
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Queue a payload for delivery without waiting.
    ///
    /// Never blocks: a full queue is reported as [`SendError::Full`] so one
    /// slow client cannot stall a room broadcast.
    pub fn send(&self, payload: Bytes) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        self.outbound.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Mark the connection closed and wake everything waiting on
    /// [`Connection::closed`].
    ///
    /// Returns `true` only for the call that actually closed it; later calls
    /// are no-ops.
    pub fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    /// Whether [`Connection::close`] has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // Sender lives in `self`, so this only returns once the flag is set
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("room", &self.room)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
