//! Fuzz target for ChatMessage decoding
//!
//! Client messages are untrusted JSON. Decoding must never panic, must honour
//! the size bound, and anything that decodes must re-encode and decode to the
//! same message.

#![no_main]

use chatrelay_proto::{ChatMessage, ProtocolError};
use libfuzzer_sys::fuzz_target;

const MAX_SIZE: usize = 4096;

fuzz_target!(|data: &[u8]| {
    match ChatMessage::decode_bounded(data, MAX_SIZE) {
        Ok(message) => {
            assert!(data.len() <= MAX_SIZE);

            let encoded = message.encode().expect("decoded message must encode");
            let decoded = ChatMessage::decode(&encoded).expect("encoded message must decode");
            assert_eq!(decoded, message);

            let payload = message.to_broadcast_payload();
            assert!(payload.starts_with(message.sender.as_bytes()));
        },
        Err(ProtocolError::MessageTooLarge { size, max }) => {
            assert_eq!(size, data.len());
            assert!(size > max);
        },
        Err(_) => {},
    }
});
