//! Transport seam between the relay and client connections.
//!
//! The relay only needs three operations from a transport: read the next
//! client message, write a message, close. Reading and writing are split into
//! two traits because they are driven by different tasks: the session owns the
//! read half, the connection's writer task owns the write half.
//!
//! # Implementations
//!
//! - [`websocket`]: production WebSocket transport (tokio-tungstenite)
//! - [`memory`]: channel-backed transport for tests

pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Peer closed the connection (EOF or close frame).
    #[error("connection closed")]
    Closed,

    /// Peer violated the framing protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Network or I/O failure.
    #[error("i/o error: {0}")]
    Io(String),
}

/// Read half of a client connection.
#[async_trait]
pub trait MessageReader: Send {
    /// Read the next complete client message.
    ///
    /// Returns [`TransportError::Closed`] once the peer has gone away.
    async fn read_message(&mut self) -> Result<Bytes, TransportError>;
}

/// Write half of a client connection.
#[async_trait]
pub trait MessageWriter: Send {
    /// Write one message to the client.
    async fn write_message(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Close the connection.
    ///
    /// Closing an already-closed connection must succeed.
    async fn close(&mut self) -> Result<(), TransportError>;
}
