//! Multi-relay simulation using turmoil.
//!
//! Two relay hosts share one bus, the way two processes share one broker.
//! Clients on different relays in the same room must see each other's
//! messages; clients in other rooms must not.

use std::{sync::Arc, time::Duration};

use chatrelay_proto::RoomName;
use chatrelay_server::{MemoryBus, Relay, RelayConfig, serve_connection};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{WebSocketStream, client_async, tungstenite::Message};
use turmoil::net::{TcpListener, TcpStream};

const PORT: u16 = 3000;

fn relay_host(sim: &mut turmoil::Sim<'_>, name: &str, bus: &MemoryBus) {
    let bus = bus.clone();
    sim.host(name, move || {
        let bus = bus.clone();
        async move {
            let relay = Relay::new(Arc::new(bus), RelayConfig::default());
            let default_room = RoomName::parse("general")?;
            let listener = TcpListener::bind(format!("0.0.0.0:{PORT}").as_str()).await?;

            loop {
                let (stream, addr) = listener.accept().await?;
                let relay = Arc::clone(&relay);
                let default_room = default_room.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(&relay, stream, addr, &default_room).await;
                });
            }
        }
    });
}

async fn join(host: &str, room: &str) -> turmoil::Result<WebSocketStream<TcpStream>> {
    let stream = TcpStream::connect(format!("{host}:{PORT}").as_str()).await?;
    let (ws, _response) = client_async(format!("ws://{host}/ws/{room}"), stream).await?;
    Ok(ws)
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> turmoil::Result<String> {
    let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await?
        .ok_or("connection ended")??;
    Ok(message.to_text()?.to_string())
}

#[test]
fn rooms_span_relays_sharing_a_bus() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(30)).build();
    let bus = MemoryBus::new();

    relay_host(&mut sim, "relay-a", &bus);
    relay_host(&mut sim, "relay-b", &bus);

    sim.client("bob", async {
        let mut bob = join("relay-b", "lobby").await?;

        let got = next_text(&mut bob).await?;
        assert_eq!(got, "alice: hello across relays");
        Ok(())
    });

    sim.client("carol", async {
        let mut carol = join("relay-b", "other").await?;

        // Only her own message ever arrives
        tokio::time::sleep(Duration::from_secs(2)).await;
        carol.send(Message::text(r#"{"sender":"carol","content":"ping"}"#)).await?;
        assert_eq!(next_text(&mut carol).await?, "carol: ping");
        Ok(())
    });

    sim.client("alice", async {
        let mut alice = join("relay-a", "lobby").await?;

        // Let bob's relay subscribe first; the bus does not replay
        tokio::time::sleep(Duration::from_secs(1)).await;
        alice.send(Message::text(r#"{"sender":"alice","content":"hello across relays"}"#)).await?;

        assert_eq!(next_text(&mut alice).await?, "alice: hello across relays");
        Ok(())
    });

    sim.run().expect("simulation failed");
}

#[test]
fn client_leaving_one_relay_does_not_disturb_the_other() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(30)).build();
    let bus = MemoryBus::new();

    relay_host(&mut sim, "relay-a", &bus);
    relay_host(&mut sim, "relay-b", &bus);

    sim.client("dave", async {
        let mut dave = join("relay-a", "lobby").await?;
        dave.close(None).await?;
        Ok(())
    });

    sim.client("erin", async {
        let mut erin = join("relay-b", "lobby").await?;

        tokio::time::sleep(Duration::from_secs(1)).await;
        erin.send(Message::text(r#"{"sender":"erin","content":"still up"}"#)).await?;
        assert_eq!(next_text(&mut erin).await?, "erin: still up");
        Ok(())
    });

    sim.run().expect("simulation failed");
}
