//! Handlers of the outbound chain: task or reply in, datagram out.

use crate::error::{constants, DiscoveryError};
use crate::pipeline::{Envelope, EnvelopeHandler, PipelineContext};
use crate::protocol::session::SessionKey;
use crate::protocol::task::{build_request, InFlightRequest};
use crate::transport::OutboundPacket;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

/// Validates a caller task and names the session it goes to.
pub struct TaskIntake;

impl EnvelopeHandler for TaskIntake {
    fn name(&self) -> &'static str {
        "TaskIntake"
    }

    fn handle(&self, envelope: &mut Envelope) {
        if envelope.is_bad() || envelope.session.is_some() || envelope.session_lookup.is_some() {
            return;
        }
        let Some(task) = &envelope.task else {
            return;
        };
        if let Err(e) = task.validate() {
            envelope.fail_task(e);
            return;
        }

        let target = envelope
            .node
            .as_ref()
            .and_then(|node| Some((node.node_id(), node.udp_address()?)));
        match target {
            Some((node_id, addr)) => {
                envelope.session_lookup = Some(SessionKey::new(node_id, addr));
            }
            None => envelope.fail_task(DiscoveryError::InvalidRecord(
                constants::ERR_NO_ADDRESS.into(),
            )),
        }
    }
}

/// Turns the task into a request and registers it as in flight.
pub struct RequestRegistration {
    context: Arc<PipelineContext>,
}

impl RequestRegistration {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl EnvelopeHandler for RequestRegistration {
    fn name(&self) -> &'static str {
        "RequestRegistration"
    }

    fn handle(&self, envelope: &mut Envelope) {
        if envelope.is_bad() {
            return;
        }
        let (Some(session), Some(completion)) = (envelope.session.clone(), envelope.completion.clone())
        else {
            return;
        };
        let Some(task) = envelope.task.take() else {
            return;
        };

        let (message, request_id) = match build_request(&task, self.context.local.seq()) {
            Ok(built) => built,
            Err(e) => {
                envelope.fail_task(e);
                return;
            }
        };
        let request = InFlightRequest::new(request_id.clone(), task, message.clone(), completion);
        if let Err(e) = session.lock().register_request(request) {
            envelope.fail_task(e);
            return;
        }

        self.context
            .schedule_request_timeout(*session.key(), request_id.clone());
        self.context.metrics.request_sent();
        trace!(session = %session.key(), %request_id, "Request registered");
        envelope.message = Some(message);
        envelope.request_id = Some(request_id);
    }
}

/// Seals the message for its session, or wraps it in a decoy when no keys exist yet.
pub struct MessageEncoder {
    context: Arc<PipelineContext>,
}

impl MessageEncoder {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl EnvelopeHandler for MessageEncoder {
    fn name(&self) -> &'static str {
        "MessageEncoder"
    }

    fn handle(&self, envelope: &mut Envelope) {
        if envelope.is_bad() || envelope.packet.is_some() {
            return;
        }
        let Some(session) = envelope.session.clone() else {
            return;
        };
        let Some(message) = envelope.message.take() else {
            return;
        };

        let mut guard = session.lock();
        match guard.seal(&message, self.context.local.id()) {
            Ok(packet) => {
                if let Some(request_id) = &envelope.request_id {
                    guard.note_request_nonce(request_id, *packet.nonce());
                    self.context
                        .registry
                        .index_nonce(*packet.nonce(), *session.key());
                }
                envelope.packet = Some(packet);
            }
            Err(e) => {
                if let Some(request) = envelope
                    .request_id
                    .as_ref()
                    .and_then(|id| guard.take_request(id))
                {
                    self.context
                        .finish_request(session.key(), &request.request_id, request.nonce.as_ref());
                }
                envelope.mark_bad_message(e);
            }
        }
    }
}

/// Masks the packet for the session's peer and hands it to the transport.
pub struct OutgoingParcelHandler {
    context: Arc<PipelineContext>,
}

impl OutgoingParcelHandler {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl EnvelopeHandler for OutgoingParcelHandler {
    fn name(&self) -> &'static str {
        "OutgoingParcelHandler"
    }

    fn handle(&self, envelope: &mut Envelope) {
        if envelope.is_bad() {
            return;
        }
        let (Some(session), Some(packet)) = (&envelope.session, envelope.packet.take()) else {
            return;
        };

        let key = *session.key();
        let outgoing = OutboundPacket {
            bytes: Bytes::from(packet.encode(&key.node_id)),
            destination: key.addr,
        };
        let size = outgoing.bytes.len() as u64;
        match self.context.transport.try_send(outgoing) {
            Ok(()) => {
                self.context.metrics.packet_sent(size);
                trace!(session = %key, size, "Packet queued for transport");
            }
            Err(TrySendError::Full(_)) => {
                self.context.metrics.envelope_dropped();
                warn!(session = %key, "Transport queue full, dropping packet");
            }
            Err(TrySendError::Closed(_)) => {
                envelope.mark_bad_packet(DiscoveryError::ServiceStopped);
            }
        }
    }
}
