//! Property-based tests for message decoding and topic derivation
//!
//! Decoding sees raw client bytes, so it must reject garbage without panicking.
//! Topic derivation must never map two rooms onto one topic.

use chatrelay_proto::{ChatMessage, MAX_ROOM_NAME_LEN, ProtocolError, RoomName};
use proptest::prelude::*;

/// Strategy for generating valid room names
fn room_name() -> impl Strategy<Value = String> {
    proptest::string::string_regex(&format!("[A-Za-z0-9_.-]{{1,{MAX_ROOM_NAME_LEN}}}"))
        .expect("valid regex")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: Arbitrary bytes never panic the decoder
    #[test]
    fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = ChatMessage::decode(&bytes);
    }

    /// Property: Any pair of strings survives encode/decode
    #[test]
    fn prop_round_trip(sender in ".*", content in ".*") {
        let msg = ChatMessage::new(sender, content);
        let decoded = ChatMessage::decode(&msg.encode()?)?;
        prop_assert_eq!(decoded, msg);
    }

    /// Property: Size limit is enforced before parsing
    #[test]
    fn prop_oversized_always_rejected(len in 1usize..256, max in 0usize..256) {
        prop_assume!(len > max);
        let bytes = vec![b' '; len];
        let result = ChatMessage::decode_bounded(&bytes, max);
        prop_assert_eq!(result, Err(ProtocolError::MessageTooLarge { size: len, max }));
    }

    /// Property: Valid room names round-trip through their topic
    #[test]
    fn prop_topic_recovers_room(name in room_name()) {
        let room = RoomName::parse(&name)?;
        let topic = room.topic();
        prop_assert_eq!(topic.room(), Some(name.as_str()));
    }

    /// Property: Distinct rooms never share a topic
    #[test]
    fn prop_topic_injective(a in room_name(), b in room_name()) {
        let room_a = RoomName::parse(&a)?;
        let room_b = RoomName::parse(&b)?;
        prop_assert_eq!(a == b, room_a.topic() == room_b.topic());
    }
}
