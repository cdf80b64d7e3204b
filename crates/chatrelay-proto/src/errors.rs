//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while validating or (de)serializing wire data.
///
/// All variants are fatal for the offending input only. A relay receiving one
/// of these from a client decides per its malformed-message policy whether the
/// session survives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Input was not a valid JSON chat message.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Input exceeded the configured size limit.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Actual size in bytes
        size: usize,
        /// Configured maximum in bytes
        max: usize,
    },

    /// Room name failed validation.
    #[error("invalid room name {name:?}: {reason}")]
    InvalidRoomName {
        /// The rejected name (truncated for display by the caller if needed)
        name: String,
        /// Which rule was violated
        reason: &'static str,
    },

    /// Serialization failed.
    #[error("encode error: {0}")]
    Encode(String),
}
