use crate::core::message::{Message, RequestId};
use crate::core::packet::{Packet, RawPacket};
use crate::error::DiscoveryError;
use crate::node::record::NodeRecord;
use crate::protocol::registry::SessionHandle;
use crate::protocol::session::SessionKey;
use crate::protocol::task::{Completion, Task};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;

/// Per-packet or per-task state threaded through a pipeline.
///
/// Handlers act only when the fields they need are present and fall through
/// otherwise. A handler that fails sets `bad_packet` or `bad_message`, which turns
/// every later handler except the terminal one into a no-op.
#[derive(Debug, Default)]
pub struct Envelope {
    /// Datagram as received
    pub incoming: Option<Bytes>,
    /// Address the datagram came from
    pub remote: Option<SocketAddr>,
    pub raw_packet: Option<RawPacket>,
    pub packet: Option<Packet>,
    /// Session to resolve or create
    pub session_lookup: Option<SessionKey>,
    pub session: Option<SessionHandle>,
    pub message: Option<Message>,
    /// Set when `message` is a request registered as in flight
    pub request_id: Option<RequestId>,
    pub task: Option<Task>,
    pub completion: Option<Arc<Completion>>,
    /// Target of an outbound task
    pub node: Option<NodeRecord>,
    pub bad_packet: Option<DiscoveryError>,
    pub bad_message: Option<DiscoveryError>,
}

impl Envelope {
    pub fn incoming(bytes: Bytes, remote: SocketAddr) -> Self {
        Self {
            incoming: Some(bytes),
            remote: Some(remote),
            ..Self::default()
        }
    }

    pub fn task(task: Task, node: NodeRecord, completion: Arc<Completion>) -> Self {
        Self {
            task: Some(task),
            node: Some(node),
            completion: Some(completion),
            ..Self::default()
        }
    }

    /// A message for an existing session, e.g. a response.
    pub fn reply(session: SessionHandle, message: Message) -> Self {
        Self {
            session: Some(session),
            message: Some(message),
            ..Self::default()
        }
    }

    /// A finished packet for an existing session, e.g. a challenge or handshake.
    pub fn packet(session: SessionHandle, packet: Packet) -> Self {
        Self {
            session: Some(session),
            packet: Some(packet),
            ..Self::default()
        }
    }

    pub fn is_bad(&self) -> bool {
        self.bad_packet.is_some() || self.bad_message.is_some()
    }

    pub fn mark_bad_packet(&mut self, error: DiscoveryError) {
        self.bad_packet = Some(error);
    }

    pub fn mark_bad_message(&mut self, error: DiscoveryError) {
        self.bad_message = Some(error);
    }

    /// Fail the task carried by this envelope, if any. The caller sees `error`.
    pub fn fail_task(&mut self, error: DiscoveryError) {
        self.task = None;
        if let Some(completion) = self.completion.take() {
            completion.resolve(Err(error));
        }
    }
}
