//! Relay and server configuration.

use std::time::Duration;

use chatrelay_proto::{DEFAULT_MAX_MESSAGE_SIZE, RoomName, Topic};

/// What a session does with a client message it cannot decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MalformedPolicy {
    /// Treat it as a protocol violation and close the session.
    #[default]
    Disconnect,
    /// Log it, drop it, keep reading.
    Skip,
}

/// How rooms map onto bus topics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TopicMode {
    /// Every room has its own `chat:<room>` topic.
    #[default]
    PerRoom,
    /// One shared `chat` topic; every client joins the default room.
    ///
    /// Interoperates with single-room deployments on the same broker.
    SingleRoom,
}

impl TopicMode {
    /// Bus topic carrying `room`'s traffic.
    pub fn topic(self, room: &RoomName) -> Topic {
        match self {
            Self::PerRoom => room.topic(),
            Self::SingleRoom => Topic::single_room(),
        }
    }
}

/// Backoff schedule for re-establishing a lost room subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResubscribePolicy {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on the delay between retries
    pub max_backoff: Duration,
    /// Consecutive failed attempts before the room feed gives up
    pub max_attempts: u32,
}

impl ResubscribePolicy {
    /// Delay before retry number `attempt` (1-based): doubles from
    /// `initial_backoff`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1 << exponent).min(self.max_backoff)
    }
}

impl Default for ResubscribePolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            max_attempts: 20,
        }
    }
}

/// Relay behaviour configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Per-connection outbound queue capacity (payloads). A client that falls
    /// this far behind is evicted.
    pub outbound_capacity: usize,
    /// Largest accepted inbound client message in bytes
    pub max_message_size: usize,
    /// Handling of undecodable client messages
    pub malformed_policy: MalformedPolicy,
    /// Room subscription retry schedule
    pub resubscribe: ResubscribePolicy,
    /// Room to topic mapping
    pub topic_mode: TopicMode,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            malformed_policy: MalformedPolicy::default(),
            resubscribe: ResubscribePolicy::default(),
            topic_mode: TopicMode::default(),
        }
    }
}

/// Bus backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusConfig {
    /// In-process bus (single node)
    Memory {
        /// Per-topic channel capacity
        capacity: usize,
    },
    /// Redis pub/sub (requires the `redis` feature)
    Redis {
        /// Connection URL, e.g. `redis://redis:6379`
        url: String,
    },
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::Memory { capacity: crate::bus::MemoryBus::DEFAULT_CAPACITY }
    }
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:3000")
    pub bind_address: String,
    /// Room joined by clients connecting to `/ws` without a room
    pub default_room: String,
    /// Bus backend
    pub bus: BusConfig,
    /// Relay behaviour
    pub relay: RelayConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            default_room: "general".to_string(),
            bus: BusConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = ResubscribePolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            max_attempts: 10,
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn topic_mode_maps_rooms() {
        let lobby = RoomName::parse("lobby").unwrap();

        assert_eq!(TopicMode::PerRoom.topic(&lobby).as_str(), "chat:lobby");
        assert_eq!(TopicMode::SingleRoom.topic(&lobby).as_str(), "chat");
    }

    #[test]
    fn defaults_disconnect_on_malformed() {
        assert_eq!(RelayConfig::default().malformed_policy, MalformedPolicy::Disconnect);
    }
}
