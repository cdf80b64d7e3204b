//! Client chat message.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Default upper bound on an inbound client message (64 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// A chat message as sent by a client.
///
/// Both fields are client-supplied and untrusted. `sender` is a display name,
/// not an authenticated identity. The JSON field names are part of the wire
/// contract and must not be renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Display name of the sender
    pub sender: String,
    /// Message body
    pub content: String,
}

impl ChatMessage {
    /// Create a message.
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self { sender: sender.into(), content: content.into() }
    }

    /// Decode a message from JSON bytes.
    ///
    /// Unknown fields are ignored. Missing `sender` or `content` is an error.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Decode a message, rejecting input larger than `max_size` before
    /// parsing.
    pub fn decode_bounded(bytes: &[u8], max_size: usize) -> Result<Self> {
        if bytes.len() > max_size {
            return Err(ProtocolError::MessageTooLarge { size: bytes.len(), max: max_size });
        }
        Self::decode(bytes)
    }

    /// Encode as JSON bytes.
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Payload published to a room's bus topic: `"sender: content"`.
    ///
    /// Every member of the room receives exactly these bytes.
    pub fn to_broadcast_payload(&self) -> Bytes {
        Bytes::from(format!("{}: {}", self.sender, self.content))
    }
}
