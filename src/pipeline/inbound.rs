//! Handlers of the inbound chain: datagram in, message dispatched.

use crate::core::packet::{Packet, RawPacket, FLAG_CHALLENGE, FLAG_HANDSHAKE, FLAG_ORDINARY};
use crate::error::{constants, DiscoveryError};
use crate::pipeline::{Envelope, EnvelopeHandler, PipelineContext};
use crate::protocol::dispatcher::Dispatch;
use crate::protocol::session::{OrdinaryOutcome, SessionKey};
use std::sync::Arc;
use tracing::{debug, trace};

/// Take the envelope's packet if it has the given kind and the envelope is healthy.
fn take_packet(envelope: &mut Envelope, flag: u8) -> Option<Packet> {
    if envelope.is_bad() || envelope.session.is_none() {
        return None;
    }
    match &envelope.packet {
        Some(packet) if packet.auth_data().flag() == flag => envelope.packet.take(),
        _ => None,
    }
}

/// Splits the datagram into masking IV and masked remainder.
pub struct IncomingDataPacker {
    context: Arc<PipelineContext>,
}

impl IncomingDataPacker {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl EnvelopeHandler for IncomingDataPacker {
    fn name(&self) -> &'static str {
        "IncomingDataPacker"
    }

    fn handle(&self, envelope: &mut Envelope) {
        if envelope.raw_packet.is_some() || envelope.is_bad() {
            return;
        }
        let Some(bytes) = envelope.incoming.clone() else {
            return;
        };
        self.context.metrics.packet_received(bytes.len() as u64);
        match RawPacket::decode(bytes) {
            Ok(raw) => envelope.raw_packet = Some(raw),
            Err(e) => envelope.mark_bad_packet(e),
        }
    }
}

/// Unmasks the header with the local masking key and parses it.
pub struct PacketDemasker {
    context: Arc<PipelineContext>,
}

impl PacketDemasker {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl EnvelopeHandler for PacketDemasker {
    fn name(&self) -> &'static str {
        "PacketDemasker"
    }

    fn handle(&self, envelope: &mut Envelope) {
        if envelope.is_bad() {
            return;
        }
        let Some(raw) = envelope.raw_packet.take() else {
            return;
        };
        match raw.demask(self.context.local.id()) {
            Ok(packet) => {
                trace!(flag = packet.auth_data().flag(), "Packet demasked");
                envelope.packet = Some(packet);
            }
            Err(e) => envelope.mark_bad_packet(e),
        }
    }
}

/// A challenge names no sender; find the session through the nonce it echoes.
pub struct ChallengeSessionResolver {
    context: Arc<PipelineContext>,
}

impl ChallengeSessionResolver {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl EnvelopeHandler for ChallengeSessionResolver {
    fn name(&self) -> &'static str {
        "ChallengeSessionResolver"
    }

    fn handle(&self, envelope: &mut Envelope) {
        if envelope.is_bad() || envelope.session.is_some() {
            return;
        }
        let Some(packet) = &envelope.packet else {
            return;
        };
        if packet.auth_data().flag() != FLAG_CHALLENGE {
            return;
        }

        let session = self
            .context
            .registry
            .session_for_nonce(packet.nonce())
            .filter(|key| Some(key.addr) == envelope.remote)
            .and_then(|key| self.context.registry.get(&key));
        match session {
            Some(session) => envelope.session = Some(session),
            None => envelope.mark_bad_packet(DiscoveryError::UnexpectedMessage(
                constants::ERR_UNMATCHED_CHALLENGE.into(),
            )),
        }
    }
}

/// Ordinary and handshake packets name their sender in the auth-data.
pub struct SenderResolver;

impl EnvelopeHandler for SenderResolver {
    fn name(&self) -> &'static str {
        "SenderResolver"
    }

    fn handle(&self, envelope: &mut Envelope) {
        if envelope.is_bad() || envelope.session.is_some() {
            return;
        }
        let (Some(packet), Some(remote)) = (&envelope.packet, envelope.remote) else {
            return;
        };
        if let Some(src_id) = packet.auth_data().src_id() {
            envelope.session_lookup = Some(SessionKey::new(*src_id, remote));
        }
    }
}

/// Answers a challenge with a handshake carrying the request it challenged.
pub struct ChallengePacketHandler {
    context: Arc<PipelineContext>,
}

impl ChallengePacketHandler {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl EnvelopeHandler for ChallengePacketHandler {
    fn name(&self) -> &'static str {
        "ChallengePacketHandler"
    }

    fn handle(&self, envelope: &mut Envelope) {
        let Some(packet) = take_packet(envelope, FLAG_CHALLENGE) else {
            return;
        };
        let Some(session) = envelope.session.clone() else {
            return;
        };

        let reply = session.lock().on_challenge(&packet, &self.context.local);
        match reply {
            Ok(reply) => {
                let key = *session.key();
                self.context.registry.forget_nonce(packet.nonce());
                self.context.registry.index_nonce(*reply.packet.nonce(), key);
                debug!(session = %key, request_id = %reply.request_id, "Answering challenge");
                // a full queue already failed the push; the request times out
                let _ = self.context.outbound.push(Envelope::packet(session, reply.packet));
            }
            Err(e) => {
                if matches!(e, DiscoveryError::HandshakeVerification(_)) {
                    self.context.metrics.handshake_failed();
                }
                envelope.mark_bad_packet(e);
            }
        }
    }
}

/// Completes a handshake answering our challenge and installs the peer's record.
pub struct HandshakePacketHandler {
    context: Arc<PipelineContext>,
}

impl HandshakePacketHandler {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl EnvelopeHandler for HandshakePacketHandler {
    fn name(&self) -> &'static str {
        "HandshakePacketHandler"
    }

    fn handle(&self, envelope: &mut Envelope) {
        let Some(packet) = take_packet(envelope, FLAG_HANDSHAKE) else {
            return;
        };
        let Some(session) = &envelope.session else {
            return;
        };

        let known = self.context.table.lookup(&session.key().node_id);
        let outcome = session.lock().on_handshake(
            &packet,
            &self.context.local,
            self.context.verifier.as_ref(),
            known,
        );
        match outcome {
            Ok(outcome) => {
                self.context.metrics.handshake_success();
                if let Some(record) = outcome.record {
                    self.context.table.insert(record);
                }
                match outcome.message {
                    Ok(message) => envelope.message = Some(message),
                    Err(e) => envelope.mark_bad_message(e),
                }
            }
            Err(e) => {
                self.context.metrics.handshake_failed();
                envelope.mark_bad_packet(e);
            }
        }
    }
}

/// Decrypts ordinary packets, challenging the sender when there are no usable keys.
pub struct OrdinaryPacketHandler {
    context: Arc<PipelineContext>,
}

impl OrdinaryPacketHandler {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl EnvelopeHandler for OrdinaryPacketHandler {
    fn name(&self) -> &'static str {
        "OrdinaryPacketHandler"
    }

    fn handle(&self, envelope: &mut Envelope) {
        let Some(packet) = take_packet(envelope, FLAG_ORDINARY) else {
            return;
        };
        let Some(session) = envelope.session.clone() else {
            return;
        };
        let outcome = session
            .lock()
            .on_ordinary(&packet, self.context.config.max_decrypt_failures);
        match outcome {
            OrdinaryOutcome::Message(message) => envelope.message = Some(message),
            OrdinaryOutcome::Challenge(challenge) => {
                self.context.metrics.challenge_sent();
                let _ = self.context.outbound.push(Envelope::packet(session, challenge));
            }
            OrdinaryOutcome::Dropped(DiscoveryError::DecryptionFailure) => {
                self.context.metrics.decrypt_failure();
                envelope.mark_bad_packet(DiscoveryError::DecryptionFailure);
            }
            OrdinaryOutcome::Dropped(e) => envelope.mark_bad_message(e),
        }
    }
}

/// Dispatches a decrypted message: requests are answered, responses complete tasks.
pub struct MessageHandler {
    context: Arc<PipelineContext>,
}

impl MessageHandler {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl EnvelopeHandler for MessageHandler {
    fn name(&self) -> &'static str {
        "MessageHandler"
    }

    fn handle(&self, envelope: &mut Envelope) {
        if envelope.is_bad() {
            return;
        }
        let (Some(session), Some(remote)) = (envelope.session.clone(), envelope.remote) else {
            return;
        };
        let Some(message) = envelope.message.take() else {
            return;
        };

        let dispatched = {
            let mut guard = session.lock();
            self.context.dispatcher.dispatch(message, &mut guard, remote)
        };
        match dispatched {
            Ok(Dispatch::Reply(replies)) => {
                for reply in replies {
                    let _ = self.context.outbound.push(Envelope::reply(session.clone(), reply));
                }
            }
            Ok(Dispatch::Completed(request, result)) => {
                self.context
                    .finish_request(session.key(), &request.request_id, request.nonce.as_ref());
                trace!(request_id = %request.request_id, "Request completed");
                request.completion.resolve(Ok(result));
            }
            Ok(Dispatch::Pending) => {}
            Err(e) => envelope.mark_bad_message(e),
        }
    }
}
