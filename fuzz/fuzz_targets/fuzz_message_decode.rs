#![no_main]

use discovery_protocol::core::message::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Fuzz plaintext message decoding
    if let Ok(msg) = Message::decode(data) {
        // Anything accepted must re-encode to the same bytes
        assert_eq!(msg.encode(), data);
    }
});
