//! Room names and bus topic derivation.
//!
//! A room name determines exactly one bus topic: [`TOPIC_PREFIX`] followed by
//! the name. Because every multi-room topic shares the same fixed prefix the
//! mapping is injective, and the charset restriction below additionally keeps
//! the topic delimiter out of room names so a topic can be split back into its
//! room unambiguously.

use std::{fmt, str::FromStr};

use crate::errors::{ProtocolError, Result};

/// Prefix prepended to a room name to form its bus topic.
pub const TOPIC_PREFIX: &str = "chat:";

/// Fixed topic used by single-room deployments.
pub const SINGLE_ROOM_TOPIC: &str = "chat";

/// Maximum room name length in bytes.
pub const MAX_ROOM_NAME_LEN: usize = 64;

/// A validated room name.
///
/// # Invariants
///
/// - Length is `1..=MAX_ROOM_NAME_LEN`
/// - Every character is ASCII alphanumeric, `_`, `-` or `.`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomName(String);

impl RoomName {
    /// Validate and wrap a room name.
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(invalid(name, "empty"));
        }
        if name.len() > MAX_ROOM_NAME_LEN {
            return Err(invalid(name, "longer than 64 bytes"));
        }
        if !name.bytes().all(is_room_byte) {
            return Err(invalid(name, "only [A-Za-z0-9_.-] allowed"));
        }
        Ok(Self(name.to_string()))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bus topic for this room.
    pub fn topic(&self) -> Topic {
        Topic::for_room(self)
    }
}

fn is_room_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.')
}

fn invalid(name: &str, reason: &'static str) -> ProtocolError {
    let name: String = name.chars().take(MAX_ROOM_NAME_LEN).collect();
    ProtocolError::InvalidRoomName { name, reason }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomName {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

/// A bus topic string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Topic for a room: `chat:<room>`.
    pub fn for_room(room: &RoomName) -> Self {
        Self(format!("{TOPIC_PREFIX}{room}"))
    }

    /// The fixed topic of a single-room deployment.
    pub fn single_room() -> Self {
        Self(SINGLE_ROOM_TOPIC.to_string())
    }

    /// The topic as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Room name this topic was derived from. `None` for the single-room
    /// topic.
    pub fn room(&self) -> Option<&str> {
        self.0.strip_prefix(TOPIC_PREFIX)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
