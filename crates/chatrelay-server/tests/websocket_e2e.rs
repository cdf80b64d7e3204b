//! End-to-end relay tests over real WebSocket connections on localhost.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use chatrelay_proto::RoomName;
use chatrelay_server::{MemoryBus, Relay, RelayConfig, Server, TopicMode};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message, http::StatusCode},
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (SocketAddr, Arc<Relay>) {
    start_server_with(RelayConfig::default()).await
}

async fn start_server_with(config: RelayConfig) -> (SocketAddr, Arc<Relay>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = Server::from_parts(
        listener,
        Arc::new(MemoryBus::new()),
        RoomName::parse("general").unwrap(),
        config,
    );
    let addr = server.local_addr().unwrap();
    let relay = Arc::clone(server.relay());
    tokio::spawn(server.run());
    (addr, relay)
}

async fn join(addr: SocketAddr, path: &str) -> Ws {
    let (ws, _response) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    ws
}

async fn wait_for_members(relay: &Relay, room: &str, count: usize) {
    let room = RoomName::parse(room).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while relay.registry().room_member_count(&room) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(relay.subscriptions().wait_until_active(&room).await);
    })
    .await
    .expect("clients never joined");
}

async fn next_text(ws: &mut Ws) -> String {
    let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for broadcast")
        .expect("connection ended")
        .unwrap();
    message.to_text().unwrap().to_string()
}

#[tokio::test]
async fn messages_fan_out_to_room_members() {
    let (addr, relay) = start_server().await;

    let mut alice = join(addr, "/ws/lobby").await;
    let mut bob = join(addr, "/ws/lobby").await;
    wait_for_members(&relay, "lobby", 2).await;

    alice.send(Message::text(r#"{"sender":"alice","content":"hi"}"#)).await.unwrap();

    assert_eq!(next_text(&mut alice).await, "alice: hi");
    assert_eq!(next_text(&mut bob).await, "alice: hi");
}

#[tokio::test]
async fn binary_frames_are_accepted() {
    let (addr, relay) = start_server().await;

    let mut alice = join(addr, "/ws/lobby").await;
    wait_for_members(&relay, "lobby", 1).await;

    alice.send(Message::binary(br#"{"sender":"alice","content":"raw"}"#.to_vec())).await.unwrap();
    assert_eq!(next_text(&mut alice).await, "alice: raw");
}

#[tokio::test]
async fn bare_path_joins_default_room() {
    let (addr, relay) = start_server().await;

    let mut anon = join(addr, "/ws").await;
    let mut named = join(addr, "/ws/general").await;
    wait_for_members(&relay, "general", 2).await;

    named.send(Message::text(r#"{"sender":"n","content":"hello"}"#)).await.unwrap();
    assert_eq!(next_text(&mut anon).await, "n: hello");
}

#[tokio::test]
async fn single_room_mode_ignores_requested_room() {
    let config = RelayConfig { topic_mode: TopicMode::SingleRoom, ..RelayConfig::default() };
    let (addr, relay) = start_server_with(config).await;

    let mut alice = join(addr, "/ws/lobby").await;
    let mut bob = join(addr, "/ws/other").await;
    wait_for_members(&relay, "general", 2).await;
    assert_eq!(relay.registry().room_member_count(&RoomName::parse("lobby").unwrap()), 0);

    alice.send(Message::text(r#"{"sender":"alice","content":"one room"}"#)).await.unwrap();
    assert_eq!(next_text(&mut alice).await, "alice: one room");
    assert_eq!(next_text(&mut bob).await, "alice: one room");
}

#[tokio::test]
async fn close_frame_deregisters_client() {
    let (addr, relay) = start_server().await;

    let mut alice = join(addr, "/ws/lobby").await;
    wait_for_members(&relay, "lobby", 1).await;

    alice.close(None).await.unwrap();

    let lobby = RoomName::parse("lobby").unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while relay.registry().room_member_count(&lobby) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client was never deregistered");
}

#[tokio::test]
async fn malformed_message_closes_connection() {
    let (addr, relay) = start_server().await;

    let mut alice = join(addr, "/ws/lobby").await;
    wait_for_members(&relay, "lobby", 1).await;

    alice.send(Message::text("definitely not json")).await.unwrap();

    let end = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match alice.next().await {
                None | Some(Ok(Message::Close(_)) | Err(_)) => break,
                Some(Ok(_)) => {},
            }
        }
    })
    .await;
    assert!(end.is_ok(), "relay kept the connection open");
}

#[tokio::test]
async fn handshake_rejects_unknown_path_and_bad_room() {
    let (addr, _relay) = start_server().await;

    match connect_async(format!("ws://{addr}/chat")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::NOT_FOUND),
        Err(e) => panic!("expected 404, got {e}"),
        Ok(_) => panic!("expected 404, handshake succeeded"),
    }

    match connect_async(format!("ws://{addr}/ws/bad:room")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::BAD_REQUEST),
        Err(e) => panic!("expected 400, got {e}"),
        Ok(_) => panic!("expected 400, handshake succeeded"),
    }
}
