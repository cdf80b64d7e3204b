//! Wire types for the chatrelay protocol.
//!
//! Clients exchange [`ChatMessage`] records encoded as JSON objects with the
//! byte-exact field names `sender` and `content`. Every room maps to exactly
//! one bus [`Topic`], derived by prefixing the validated [`RoomName`] with
//! [`TOPIC_PREFIX`].
//!
//! This crate is pure data: no I/O, no async. The relay server and tests
//! share it so both sides agree on encoding and topic derivation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod errors;
mod message;
mod room;

pub use errors::{ProtocolError, Result};
pub use message::{ChatMessage, DEFAULT_MAX_MESSAGE_SIZE};
pub use room::{MAX_ROOM_NAME_LEN, RoomName, SINGLE_ROOM_TOPIC, TOPIC_PREFIX, Topic};
