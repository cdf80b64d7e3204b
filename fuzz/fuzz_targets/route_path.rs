//! Fuzz target for WebSocket upgrade path routing
//!
//! The request path is attacker-controlled. Routing must never panic, and any
//! room it accepts must be a valid room whose topic maps back to it.

#![no_main]

use chatrelay_proto::RoomName;
use chatrelay_server::transport::websocket::route;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(path) = std::str::from_utf8(data) else {
        return;
    };
    let default_room = RoomName::parse("general").expect("valid default room");

    if let Ok(room) = route(path, &default_room) {
        assert!(path.starts_with("/ws"));
        assert_eq!(RoomName::parse(room.as_str()).as_ref(), Ok(&room));
        assert_eq!(room.topic().room(), Some(room.as_str()));
    }
});
