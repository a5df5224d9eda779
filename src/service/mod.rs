//! # Discovery Service
//!
//! Wires the session core together: one inbound and one outbound pipeline sharing a
//! [`PipelineContext`], fed by the transport and by the task API.
//!
//! The service never touches a socket. Datagrams come in through
//! [`DiscoveryService::handle_incoming`] and leave through the receiver returned by
//! [`DiscoveryService::take_outgoing`]; [`crate::transport::UdpTransport`] connects
//! both ends to a UDP socket.

pub mod discovery;

pub use discovery::{DiscoveryService, DiscoveryServiceBuilder};
