//! WebSocket transport using tokio-tungstenite.
//!
//! Clients connect to `/ws/<room>`; `/ws` joins the server's default room.
//! The room is parsed from the upgrade request path during the handshake, and
//! a request for an unknown path or an invalid room name is refused before
//! the upgrade completes (404 / 400).
//!
//! Text and binary frames are both accepted as client messages. Broadcast
//! payloads go out as text frames when they are valid UTF-8. Ping/pong is
//! answered by tungstenite itself.

use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_proto::{ProtocolError, RoomName};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    WebSocketStream, accept_hdr_async,
    tungstenite::{
        Error as WsError, Message,
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
    },
};

use super::{MessageReader, MessageWriter, TransportError};

/// Path prefix of the WebSocket endpoint.
pub const WS_PATH: &str = "/ws";

/// Why an upgrade request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Path is not under [`WS_PATH`]
    NotFound,
    /// Path names an invalid room
    InvalidRoom(ProtocolError),
}

/// Resolve the room an upgrade request asks for.
///
/// `/ws` and `/ws/` map to `default_room`, `/ws/<name>` to `<name>`.
pub fn route(path: &str, default_room: &RoomName) -> Result<RoomName, RouteError> {
    let rest = path.strip_prefix(WS_PATH).ok_or(RouteError::NotFound)?;
    match rest {
        "" | "/" => Ok(default_room.clone()),
        _ => {
            let name = rest.strip_prefix('/').ok_or(RouteError::NotFound)?;
            RoomName::parse(name).map_err(RouteError::InvalidRoom)
        },
    }
}

fn reject(status: StatusCode, reason: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason));
    *response.status_mut() = status;
    response
}

/// Perform the WebSocket handshake on `stream` and split the result.
///
/// Returns the requested room together with the read and write halves.
pub async fn accept<S>(
    stream: S,
    default_room: &RoomName,
) -> Result<(RoomName, WsReader<S>, WsWriter<S>), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut routed = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match route(request.uri().path(), default_room) {
            Ok(room) => {
                routed = Some(room);
                Ok(response)
            },
            Err(RouteError::NotFound) => {
                Err(reject(StatusCode::NOT_FOUND, format!("no such endpoint; use {WS_PATH}/<room>")))
            },
            Err(RouteError::InvalidRoom(e)) => Err(reject(StatusCode::BAD_REQUEST, e.to_string())),
        }
    };

    let ws = accept_hdr_async(stream, callback)
        .await
        .map_err(|e| TransportError::Protocol(format!("handshake failed: {e}")))?;
    let room = routed
        .ok_or_else(|| TransportError::Protocol("handshake completed without a room".into()))?;

    let (sink, stream) = ws.split();
    Ok((room, WsReader { stream }, WsWriter { sink }))
}

/// Read half of a WebSocket connection.
pub struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

/// Write half of a WebSocket connection.
pub struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> MessageReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_message(&mut self) -> Result<Bytes, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Bytes::copy_from_slice(text.as_bytes())),
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {},
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(map_ws_error(e)),
            }
        }
    }
}

#[async_trait]
impl<S> MessageWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_message(&mut self, payload: Bytes) -> Result<(), TransportError> {
        let message = match String::from_utf8(payload.to_vec()) {
            Ok(text) => Message::text(text),
            Err(_) => Message::binary(payload),
        };
        self.sink.send(message).await.map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(map_ws_error(e)),
        }
    }
}

fn map_ws_error(err: WsError) -> TransportError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        WsError::Io(e) => TransportError::Io(e.to_string()),
        other => TransportError::Protocol(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn general() -> RoomName {
        RoomName::parse("general").unwrap()
    }

    #[test]
    fn route_bare_path_uses_default_room() {
        assert_eq!(route("/ws", &general()), Ok(general()));
        assert_eq!(route("/ws/", &general()), Ok(general()));
    }

    #[test]
    fn route_named_room() {
        assert_eq!(route("/ws/lobby", &general()), Ok(RoomName::parse("lobby").unwrap()));
    }

    #[test]
    fn route_rejects_other_paths() {
        assert_eq!(route("/", &general()), Err(RouteError::NotFound));
        assert_eq!(route("/wsx", &general()), Err(RouteError::NotFound));
        assert_eq!(route("/api/ws", &general()), Err(RouteError::NotFound));
    }

    #[test]
    fn route_rejects_invalid_room() {
        assert!(matches!(route("/ws/a/b", &general()), Err(RouteError::InvalidRoom(_))));
        assert!(matches!(route("/ws/a:b", &general()), Err(RouteError::InvalidRoom(_))));
    }
}
