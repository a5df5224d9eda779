//! # Core Protocol Components
//!
//! Wire-level building blocks: packet framing and masking, message encoding
//! (RLP via `alloy-rlp`), and the datagram codec.
//!
//! ## Components
//! - **Packet**: masked header + sealed message, three kinds selected by the flag byte
//! - **Message**: PING/PONG, FINDNODE/NODES, TALKREQ/TALKRESP
//! - **Codec**: Tokio codec for `UdpFramed`
//!
//! ## Wire Format
//! ```text
//! [IV(16)] [masked: "discv5"(6) Version(2) Flag(1) Nonce(12) AuthSize(2) AuthData(N)] [Message(M)]
//! ```
//!
//! ## Security
//! - Packet size bounded to 63..=1280 bytes before any allocation
//! - Header bytes are bound into the message tag
//! - Decoy and corrupt packets fail the same way

pub mod codec;
pub mod message;
pub mod packet;
