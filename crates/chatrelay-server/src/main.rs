//! Chatrelay server binary.
//!
//! # Usage
//!
//! ```bash
//! # Single node, in-process bus
//! chatrelay-server --bind 0.0.0.0:3000
//!
//! # Several nodes sharing a Redis broker (needs the `redis` feature)
//! chatrelay-server --bind 0.0.0.0:3000 --bus redis --redis-url redis://redis:6379
//!
//! # Everyone in one room on the shared `chat` topic
//! chatrelay-server --single-room
//! ```

use chatrelay_server::{
    BusConfig, MalformedPolicy, MemoryBus, RelayConfig, Server, ServerRuntimeConfig, TopicMode,
};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Bus backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BusKind {
    /// In-process bus (single node)
    Memory,
    /// Redis pub/sub
    Redis,
}

/// Chatrelay WebSocket fan-out server
#[derive(Parser, Debug)]
#[command(name = "chatrelay-server")]
#[command(about = "Room-scoped WebSocket fan-out relay")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    bind: String,

    /// Bus backend
    #[arg(long, value_enum, default_value = "memory")]
    bus: BusKind,

    /// Redis URL (with --bus redis)
    #[arg(long, default_value = "redis://redis:6379")]
    redis_url: String,

    /// Per-topic channel capacity of the memory bus
    #[arg(long, default_value_t = MemoryBus::DEFAULT_CAPACITY)]
    bus_capacity: usize,

    /// Room joined by clients connecting to /ws
    #[arg(long, default_value = "general")]
    default_room: String,

    /// Per-connection outbound queue capacity
    #[arg(long, default_value = "256")]
    outbound_capacity: usize,

    /// Largest accepted client message in bytes
    #[arg(long, default_value = "65536")]
    max_message_size: usize,

    /// Drop malformed client messages instead of disconnecting
    #[arg(long)]
    skip_malformed: bool,

    /// Put every client in the default room, published on the `chat` topic
    #[arg(long)]
    single_room: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Chatrelay server starting");
    tracing::info!("Binding to {}", args.bind);

    let bus = match args.bus {
        BusKind::Memory => BusConfig::Memory { capacity: args.bus_capacity },
        BusKind::Redis => BusConfig::Redis { url: args.redis_url },
    };
    let malformed_policy =
        if args.skip_malformed { MalformedPolicy::Skip } else { MalformedPolicy::Disconnect };

    let topic_mode = if args.single_room { TopicMode::SingleRoom } else { TopicMode::PerRoom };

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        default_room: args.default_room,
        bus,
        relay: RelayConfig {
            outbound_capacity: args.outbound_capacity,
            max_message_size: args.max_message_size,
            malformed_policy,
            topic_mode,
            ..Default::default()
        },
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
