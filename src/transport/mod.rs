//! # Transport Layer
//!
//! The session core only sees opaque `(bytes, address)` pairs. This module defines
//! the outbound half of that boundary and a UDP adapter driving a service.

pub mod udp;

use bytes::Bytes;
use std::net::SocketAddr;

pub use crate::core::codec::DatagramCodec;
pub use udp::UdpTransport;

/// A datagram ready for the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    pub bytes: Bytes,
    pub destination: SocketAddr,
}
