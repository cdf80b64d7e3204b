//! Chatrelay server.
//!
//! A real-time fan-out relay. Clients connect over WebSocket into named rooms;
//! every message a client sends is published to the room's topic on a shared
//! pub/sub bus, and every payload arriving on that topic is pushed to all
//! locally connected members of the room. Several relay processes sharing one
//! bus behave like a single relay.
//!
//! # Architecture
//!
//! ```text
//! client ─► Session ─► Bus::publish(chat:<room>)
//!                          │
//!          every relay's room feed (RoomSubscriptions)
//!                          │
//!                     Dispatcher ─► registry snapshot ─► outbound queues ─► writer tasks ─► clients
//! ```
//!
//! # Components
//!
//! - [`Relay`]: owns the registry, the room subscriptions and the bus handle
//! - [`ConnectionRegistry`]: live connections indexed by room
//! - [`RoomSubscriptions`]: one supervised bus subscription per room
//! - [`Dispatcher`]: delivers one payload to every member of a room
//! - [`Session`]: per-connection read loop and state machine
//! - [`Bus`]: pub/sub seam ([`MemoryBus`], [`ChaoticBus`], `RedisBus`)
//! - [`transport`]: client connection seam (WebSocket, in-memory)
//! - [`Server`]: TCP accept loop wiring WebSocket clients into a relay

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
mod config;
mod connection;
mod dispatcher;
mod error;
mod registry;
mod relay;
mod session;
mod subscriptions;
pub mod transport;

use std::{future::Future, net::SocketAddr, sync::Arc};

#[cfg(feature = "redis")]
pub use bus::RedisBus;
pub use bus::{Bus, BusError, BusSubscription, ChaoticBus, MemoryBus};
use chatrelay_proto::RoomName;
pub use config::{
    BusConfig, MalformedPolicy, RelayConfig, ResubscribePolicy, ServerRuntimeConfig, TopicMode,
};
pub use connection::{Connection, ConnectionId, SendError};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::RelayError;
pub use registry::ConnectionRegistry;
pub use relay::Relay;
pub use session::{CloseReason, Session, SessionOutcome, SessionState};
pub use subscriptions::{RoomSubscriptions, SubscriptionState};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};

/// Production chatrelay server.
///
/// Accepts TCP connections, upgrades them to WebSocket and hands each client
/// to the [`Relay`].
pub struct Server {
    listener: TcpListener,
    relay: Arc<Relay>,
    default_room: RoomName,
}

impl Server {
    /// Connect to the configured bus and bind the listener.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, RelayError> {
        let default_room = RoomName::parse(&config.default_room)
            .map_err(|e| RelayError::Config(format!("invalid default room: {e}")))?;
        let bus = connect_bus(&config.bus).await?;
        let listener = TcpListener::bind(&config.bind_address).await?;

        Ok(Self::from_parts(listener, bus, default_room, config.relay))
    }

    /// Build a server from an already bound listener and bus.
    pub fn from_parts(
        listener: TcpListener,
        bus: Arc<dyn Bus>,
        default_room: RoomName,
        config: RelayConfig,
    ) -> Self {
        Self { listener, relay: Relay::new(bus, config), default_room }
    }

    /// Run the accept loop forever.
    pub async fn run(self) -> Result<(), RelayError> {
        self.run_until(std::future::pending()).await
    }

    /// Run the accept loop until `shutdown` resolves, then close every
    /// connection and room feed.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), RelayError> {
        tracing::info!(addr = %self.listener.local_addr()?, default_room = %self.default_room, "Server starting");
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    let relay = Arc::clone(&self.relay);
                    let default_room = self.default_room.clone();

                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(&relay, stream, addr, &default_room).await {
                            tracing::debug!(%addr, error = %e, "Connection rejected");
                        }
                    });
                },
                Err(e) => {
                    tracing::error!(error = %e, "Accept error");
                },
            }
        }

        self.relay.shutdown();
        Ok(())
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// The relay behind this server.
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }
}

/// Upgrade one accepted stream to WebSocket and run its session.
///
/// Generic over the stream so simulated networks can drive the same path.
/// In [`TopicMode::SingleRoom`] every client lands in `default_room` whatever
/// path it asked for. Returns once the client has left.
pub async fn serve_connection<S>(
    relay: &Arc<Relay>,
    stream: S,
    addr: SocketAddr,
    default_room: &RoomName,
) -> Result<SessionOutcome, RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (room, reader, writer) = transport::websocket::accept(stream, default_room)
        .await
        .map_err(|e| RelayError::Transport(e.to_string()))?;
    let room = match relay.config().topic_mode {
        TopicMode::PerRoom => room,
        TopicMode::SingleRoom => default_room.clone(),
    };

    Ok(relay.serve(room, addr.to_string(), reader, writer).await)
}

#[cfg(feature = "redis")]
async fn connect_bus(config: &BusConfig) -> Result<Arc<dyn Bus>, RelayError> {
    match config {
        BusConfig::Memory { capacity } => Ok(Arc::new(MemoryBus::with_capacity(*capacity))),
        BusConfig::Redis { url } => Ok(Arc::new(RedisBus::connect(url).await?)),
    }
}

#[cfg(not(feature = "redis"))]
#[allow(clippy::unused_async)]
async fn connect_bus(config: &BusConfig) -> Result<Arc<dyn Bus>, RelayError> {
    match config {
        BusConfig::Memory { capacity } => Ok(Arc::new(MemoryBus::with_capacity(*capacity))),
        BusConfig::Redis { .. } => Err(RelayError::Config(
            "redis bus requested but chatrelay-server was built without the `redis` feature"
                .to_string(),
        )),
    }
}
