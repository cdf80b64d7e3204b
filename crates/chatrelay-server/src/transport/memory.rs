//! Channel-backed transport for tests and simulation.
//!
//! [`channel`] returns the relay-side reader/writer pair plus a
//! [`MemoryPeer`] playing the client. The peer can inject read errors and
//! write failures to drive the relay's failure paths deterministically.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{MessageReader, MessageWriter, TransportError};

/// Shared link flags between the writer and the peer.
#[derive(Debug, Default)]
struct LinkState {
    fail_writes: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

/// Relay-side read half.
#[derive(Debug)]
pub struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<Result<Bytes, TransportError>>,
}

/// Relay-side write half.
#[derive(Debug)]
pub struct MemoryWriter {
    outbound: mpsc::UnboundedSender<Bytes>,
    link: Arc<LinkState>,
}

/// Client side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    to_relay: Option<mpsc::UnboundedSender<Result<Bytes, TransportError>>>,
    from_relay: mpsc::UnboundedReceiver<Bytes>,
    link: Arc<LinkState>,
}

/// Create a connected in-memory transport.
pub fn channel() -> (MemoryReader, MemoryWriter, MemoryPeer) {
    let (to_relay, inbound) = mpsc::unbounded_channel();
    let (outbound, from_relay) = mpsc::unbounded_channel();
    let link = Arc::new(LinkState::default());

    (
        MemoryReader { inbound },
        MemoryWriter { outbound, link: Arc::clone(&link) },
        MemoryPeer { to_relay: Some(to_relay), from_relay, link },
    )
}

#[async_trait]
impl MessageReader for MemoryReader {
    async fn read_message(&mut self) -> Result<Bytes, TransportError> {
        self.inbound.recv().await.unwrap_or(Err(TransportError::Closed))
    }
}

#[async_trait]
impl MessageWriter for MemoryWriter {
    async fn write_message(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if self.link.fail_writes.load(Ordering::Acquire) {
            return Err(TransportError::Io("injected write failure".to_string()));
        }
        if self.link.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.outbound.send(payload).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.link.close_calls.fetch_add(1, Ordering::AcqRel);
        self.link.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl MemoryPeer {
    /// Send raw bytes to the relay.
    ///
    /// Returns `false` if the peer already disconnected.
    pub fn send(&self, bytes: impl Into<Bytes>) -> bool {
        self.to_relay.as_ref().is_some_and(|tx| tx.send(Ok(bytes.into())).is_ok())
    }

    /// Make the relay's next read fail with `error`.
    pub fn inject_read_error(&self, error: TransportError) -> bool {
        self.to_relay.as_ref().is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// Make every subsequent relay write fail.
    pub fn fail_writes(&self) {
        self.link.fail_writes.store(true, Ordering::Release);
    }

    /// Hang up: the relay reads [`TransportError::Closed`] once queued
    /// messages are drained.
    pub fn disconnect(&mut self) {
        self.to_relay = None;
    }

    /// Next message written by the relay. `None` once the writer is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.from_relay.recv().await
    }

    /// Next message written by the relay, if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.from_relay.try_recv().ok()
    }

    /// Whether the relay closed its side.
    pub fn is_closed_by_relay(&self) -> bool {
        self.link.closed.load(Ordering::Acquire)
    }

    /// How many times the relay called `close`.
    pub fn close_calls(&self) -> usize {
        self.link.close_calls.load(Ordering::Acquire)
    }
}
