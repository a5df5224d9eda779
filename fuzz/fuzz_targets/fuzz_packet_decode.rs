#![no_main]

use discovery_protocol::core::packet::RawPacket;
use discovery_protocol::node::NodeId;
use libfuzzer_sys::fuzz_target;

const LOCAL: NodeId = NodeId::new([0x42; 32]);

fuzz_target!(|data: &[u8]| {
    // Size checks, header demasking and auth-data parsing on hostile input
    if let Ok(raw) = RawPacket::decode(data.to_vec()) {
        if let Ok(packet) = raw.demask(&LOCAL) {
            let _ = packet.decrypt_message(&[0u8; 32]);
        }
    }
});
