//! Per-peer session: handshake state machine, directional keys, in-flight requests.
//!
//! ```text
//! Unestablished --(ordinary packet, no keys)--> ChallengeIssued --(valid handshake)--> Established
//!       ^                                                                                 |
//!       +--------------------------(repeated decrypt failure)----------------------------+
//!
//! Unestablished/Established --(challenge matching one of our requests)--> Established
//! ```
//!
//! When both peers challenge each other at once, each answers the other's challenge
//! and each receives a handshake. Only the handshake initiated by the lower node id
//! sets the keys: its initiator keeps its keys, the other side replaces its own with
//! the responder keys of that handshake.
//!
//! Every method here runs under the session's lock, so a handshake completes before
//! any ordinary packet that depends on its keys is decrypted.

use crate::core::message::{Message, RequestId};
use crate::core::packet::{AuthData, IdNonce, Nonce, Packet, PacketHeader};
use crate::error::{constants, DiscoveryError, Result};
use crate::node::id::NodeId;
use crate::node::local::LocalNode;
use crate::node::record::{NodeRecord, RecordVerifier};
use crate::protocol::handshake::{self, DirectionalKeys};
use crate::protocol::task::InFlightRequest;
use crate::utils::crypto::random_array;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use tracing::{debug, trace};

/// Sessions are keyed by the peer's node id and the address it talks from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub node_id: NodeId,
    pub addr: SocketAddr,
}

impl SessionKey {
    pub fn new(node_id: NodeId, addr: SocketAddr) -> Self {
        Self { node_id, addr }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.node_id, self.addr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unestablished,
    /// We challenged the peer and wait for its handshake.
    ChallengeIssued,
    Established,
}

/// A handshake whose id signature and AEAD tag checked out.
///
/// The keys are installed even when the plaintext is not a valid message; `message`
/// then carries the decode error.
#[derive(Debug)]
pub struct HandshakeOutcome {
    pub message: Result<Message>,
    /// Newer record embedded in the handshake, for the node table
    pub record: Option<NodeRecord>,
}

/// Result of feeding an ordinary packet to the session.
#[derive(Debug)]
pub enum OrdinaryOutcome {
    Message(Message),
    /// No usable keys: answer with this challenge.
    Challenge(Packet),
    /// Decrypt failure below the reset threshold.
    Dropped(DiscoveryError),
}

/// Handshake packet answering a challenge, and the request it carries.
#[derive(Debug)]
pub struct HandshakeReply {
    pub packet: Packet,
    pub request_id: RequestId,
}

pub struct Session {
    key: SessionKey,
    record: Option<NodeRecord>,
    state: SessionState,
    keys: Option<DirectionalKeys>,
    /// `masking-iv || header` of the challenge we sent, until a handshake answers it
    challenge: Option<Vec<u8>>,
    decrypt_failures: u32,
    requests: HashMap<RequestId, InFlightRequest>,
    max_requests: usize,
}

impl Session {
    pub fn new(key: SessionKey, record: Option<NodeRecord>, max_requests: usize) -> Self {
        Self {
            key,
            record,
            state: SessionState::Unestablished,
            keys: None,
            challenge: None,
            decrypt_failures: 0,
            requests: HashMap::new(),
            max_requests,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn node_id(&self) -> &NodeId {
        &self.key.node_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established && self.keys.is_some()
    }

    pub fn record(&self) -> Option<&NodeRecord> {
        self.record.as_ref()
    }

    /// Keep the newer of the held record and `record`.
    pub fn update_record(&mut self, record: NodeRecord) {
        match &self.record {
            Some(current) if current.seq() >= record.seq() => {}
            _ => self.record = Some(record),
        }
    }

    fn establish(&mut self, keys: DirectionalKeys) {
        self.keys = Some(keys);
        self.state = SessionState::Established;
        self.decrypt_failures = 0;
        debug!(session = %self.key, "Session established");
    }

    /// Forget keys and challenge, back to `Unestablished`.
    pub fn reset(&mut self) {
        self.keys = None;
        self.challenge = None;
        self.state = SessionState::Unestablished;
        self.decrypt_failures = 0;
    }

    // ---- in-flight requests ----

    pub fn register_request(&mut self, request: InFlightRequest) -> Result<()> {
        if self.requests.len() >= self.max_requests {
            return Err(DiscoveryError::TooManyRequests);
        }
        self.requests.insert(request.request_id.clone(), request);
        Ok(())
    }

    pub fn request_mut(&mut self, request_id: &RequestId) -> Option<&mut InFlightRequest> {
        self.requests.get_mut(request_id)
    }

    pub fn take_request(&mut self, request_id: &RequestId) -> Option<InFlightRequest> {
        self.requests.remove(request_id)
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// Remove every in-flight request, for session teardown.
    pub fn drain_requests(&mut self) -> Vec<InFlightRequest> {
        self.requests.drain().map(|(_, request)| request).collect()
    }

    fn request_by_nonce(&self, nonce: &Nonce) -> Option<&InFlightRequest> {
        self.requests
            .values()
            .find(|request| request.nonce.as_ref() == Some(nonce))
    }

    // ---- outbound ----

    /// Wrap a message for the peer: sealed under the send key when established,
    /// otherwise a random decoy that provokes a challenge.
    pub fn seal(&mut self, message: &Message, local_id: &NodeId) -> Result<Packet> {
        let nonce: Nonce = random_array();
        match (&self.state, &self.keys) {
            (SessionState::Established, Some(keys)) => Packet::sealed(
                PacketHeader {
                    nonce,
                    auth_data: AuthData::Ordinary { src_id: *local_id },
                },
                message,
                &keys.encrypt,
            ),
            _ => {
                let mut packet = Packet::random_ordinary(*local_id);
                packet.header.nonce = nonce;
                trace!(session = %self.key, "No session keys, sending random packet");
                Ok(packet)
            }
        }
    }

    /// Remember which packet carried a request, so a challenge echoing it can be matched.
    pub fn note_request_nonce(&mut self, request_id: &RequestId, nonce: Nonce) {
        if let Some(request) = self.requests.get_mut(request_id) {
            request.nonce = Some(nonce);
        }
    }

    // ---- inbound ----

    /// Build a challenge for the packet that carried `nonce`, replacing any earlier one.
    pub fn issue_challenge(&mut self, nonce: Nonce) -> Packet {
        let id_nonce: IdNonce = random_array();
        let enr_seq = self.record.as_ref().map_or(0, NodeRecord::seq);
        let packet = Packet::challenge(nonce, id_nonce, enr_seq);

        self.keys = None;
        self.decrypt_failures = 0;
        self.state = SessionState::ChallengeIssued;
        self.challenge = Some(packet.message_ad());
        debug!(session = %self.key, enr_seq, "Challenge issued");
        packet
    }

    /// Decrypt an ordinary packet or decide how to answer it.
    pub fn on_ordinary(&mut self, packet: &Packet, max_decrypt_failures: u32) -> OrdinaryOutcome {
        let Some(keys) = self.keys.as_ref() else {
            return OrdinaryOutcome::Challenge(self.issue_challenge(*packet.nonce()));
        };

        match packet.decrypt_message(&keys.decrypt) {
            Ok(message) => {
                self.decrypt_failures = 0;
                OrdinaryOutcome::Message(message)
            }
            Err(DiscoveryError::DecryptionFailure) => {
                self.decrypt_failures += 1;
                if self.decrypt_failures >= max_decrypt_failures {
                    debug!(
                        session = %self.key,
                        failures = self.decrypt_failures,
                        "Repeated decrypt failures, resetting session"
                    );
                    self.reset();
                    OrdinaryOutcome::Challenge(self.issue_challenge(*packet.nonce()))
                } else {
                    OrdinaryOutcome::Dropped(DiscoveryError::DecryptionFailure)
                }
            }
            // garbage under a correct key is a bad message, not a key problem
            Err(other) => OrdinaryOutcome::Dropped(other),
        }
    }

    /// Answer a challenge that echoes the nonce of one of our requests.
    ///
    /// Derives fresh keys, moves to `Established`, and returns the handshake packet
    /// carrying the matched request sealed under the new send key. A challenge we
    /// issued ourselves stays pending so the peer's crossing handshake still verifies.
    pub fn on_challenge(&mut self, packet: &Packet, local: &LocalNode) -> Result<HandshakeReply> {
        let AuthData::Challenge { enr_seq, .. } = packet.auth_data() else {
            return Err(DiscoveryError::UnexpectedMessage(
                constants::ERR_UNMATCHED_CHALLENGE.into(),
            ));
        };
        let request = self.request_by_nonce(packet.nonce()).ok_or_else(|| {
            DiscoveryError::UnexpectedMessage(constants::ERR_UNMATCHED_CHALLENGE.into())
        })?;
        let request_id = request.request_id.clone();
        let message = request.message.clone();

        let remote_key = self.record.as_ref().map(NodeRecord::public_key).ok_or_else(|| {
            DiscoveryError::HandshakeVerification(constants::ERR_NO_PEER_RECORD.into())
        })?;

        let challenge_data = packet.message_ad();
        let hs = handshake::initiate(local.key(), &self.key.node_id, &remote_key, &challenge_data)?;

        let record = (*enr_seq < local.seq()).then(|| local.record().to_bytes());
        let nonce: Nonce = random_array();
        let header = PacketHeader {
            nonce,
            auth_data: AuthData::Handshake {
                src_id: *local.id(),
                id_signature: hs.id_signature.to_vec(),
                ephemeral_key: hs.ephemeral_key.to_vec(),
                record,
            },
        };
        let reply = Packet::sealed(header, &message, &hs.keys.encrypt)?;

        if self.challenge.is_some() {
            debug!(session = %self.key, "Handshakes crossed");
        }
        self.establish(hs.keys);
        self.note_request_nonce(&request_id, nonce);
        Ok(HandshakeReply {
            packet: reply,
            request_id,
        })
    }

    /// Complete a handshake the peer sent in reply to our challenge.
    ///
    /// Nothing is committed unless the record, the id signature and the AEAD tag all
    /// check out. A plaintext that fails to decode still installs the keys.
    pub fn on_handshake(
        &mut self,
        packet: &Packet,
        local: &LocalNode,
        verifier: &dyn RecordVerifier,
        known: Option<NodeRecord>,
    ) -> Result<HandshakeOutcome> {
        let Some(challenge_data) = &self.challenge else {
            return Err(DiscoveryError::HandshakeVerification(
                constants::ERR_NO_CHALLENGE.into(),
            ));
        };
        let AuthData::Handshake {
            src_id,
            id_signature,
            ephemeral_key,
            record,
        } = packet.auth_data()
        else {
            return Err(DiscoveryError::HandshakeVerification(
                constants::ERR_NO_CHALLENGE.into(),
            ));
        };

        let held = self.record.clone().or(known);
        let embedded = match record {
            Some(bytes) => {
                let record = verifier.verify_and_parse(bytes)?;
                if record.node_id() != *src_id {
                    return Err(DiscoveryError::HandshakeVerification(
                        constants::ERR_RECORD_ID_MISMATCH.into(),
                    ));
                }
                if held.as_ref().is_some_and(|h| h.seq() > record.seq()) {
                    return Err(DiscoveryError::HandshakeVerification(
                        constants::ERR_RECORD_SEQ_REGRESSION.into(),
                    ));
                }
                Some(record)
            }
            None => None,
        };

        let remote_key = embedded
            .as_ref()
            .or(held.as_ref())
            .map(NodeRecord::public_key)
            .ok_or_else(|| {
                DiscoveryError::HandshakeVerification(constants::ERR_NO_PEER_RECORD.into())
            })?;

        let keys = handshake::respond(
            local.key(),
            src_id,
            &remote_key,
            challenge_data,
            id_signature,
            ephemeral_key,
        )?;
        let message = match packet.decrypt_message(&keys.decrypt) {
            Err(DiscoveryError::DecryptionFailure) => {
                return Err(DiscoveryError::DecryptionFailure);
            }
            decoded => decoded,
        };

        if let Some(record) = held {
            self.update_record(record);
        }
        if let Some(record) = embedded.clone() {
            self.update_record(record);
        }
        self.challenge = None;
        if self.is_established() && local.id() < src_id {
            // crossed handshakes: ours was initiated by the lower id and wins
            debug!(session = %self.key, "Keeping keys of our own handshake");
        } else {
            self.establish(keys);
        }
        Ok(HandshakeOutcome {
            message,
            record: embedded,
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("requests", &self.requests.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::core::packet::RawPacket;
    use crate::node::key::NodeKey;
    use crate::node::record::V4Verifier;
    use crate::protocol::task::{build_request, Completion, Task};
    use crate::utils::crypto::encrypt_message;

    struct Peer {
        local: LocalNode,
        addr: SocketAddr,
    }

    fn peer(secret: u8, port: u16) -> Peer {
        let key = NodeKey::from_bytes(&[secret; 32]).unwrap();
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let record = NodeRecord::builder().seq(1).udp(addr).sign(&key).unwrap();
        Peer {
            local: LocalNode::new(key, record).unwrap(),
            addr,
        }
    }

    fn wire(packet: &Packet, dest: &NodeId) -> Packet {
        RawPacket::decode(packet.encode(dest))
            .unwrap()
            .demask(dest)
            .unwrap()
    }

    /// Session towards `to` that already holds its record.
    fn session_towards(to: &Peer) -> Session {
        Session::new(
            SessionKey::new(*to.local.id(), to.addr),
            Some(to.local.record().clone()),
            16,
        )
    }

    /// Register a ping and seal it. Returns the ping and the packet as `to` sees it.
    fn send_ping(session: &mut Session, from: &Peer, to: &Peer) -> (Message, Packet) {
        let (message, request_id) = build_request(&Task::Ping, from.local.seq()).unwrap();
        let (completion, _future) = Completion::new();
        session
            .register_request(InFlightRequest::new(
                request_id.clone(),
                Task::Ping,
                message.clone(),
                completion,
            ))
            .unwrap();
        let packet = session.seal(&message, from.local.id()).unwrap();
        session.note_request_nonce(&request_id, *packet.nonce());
        (message, wire(&packet, to.local.id()))
    }

    fn expect_challenge(outcome: OrdinaryOutcome) -> Packet {
        match outcome {
            OrdinaryOutcome::Challenge(packet) => packet,
            other => panic!("expected challenge, got {other:?}"),
        }
    }

    fn pong_for(message: &Message, to: &Peer) -> Message {
        Message::Pong {
            request_id: message.request_id().clone(),
            enr_seq: 1,
            recipient_ip: to.addr.ip(),
            recipient_port: to.addr.port(),
        }
    }

    /// Run A's first ping through B's challenge and A's handshake.
    fn established(a: &Peer, b: &Peer) -> (Session, Session) {
        let mut a_side = session_towards(b);
        let mut b_side = Session::new(SessionKey::new(*a.local.id(), a.addr), None, 16);
        let (_, decoy) = send_ping(&mut a_side, a, b);
        let challenge = expect_challenge(b_side.on_ordinary(&decoy, 2));
        let reply = a_side
            .on_challenge(&wire(&challenge, a.local.id()), &a.local)
            .unwrap();
        b_side
            .on_handshake(&wire(&reply.packet, b.local.id()), &b.local, &V4Verifier, None)
            .unwrap();
        assert!(a_side.is_established() && b_side.is_established());
        (a_side, b_side)
    }

    #[test]
    fn test_full_handshake_between_two_sessions() {
        let a = peer(1, 30301);
        let b = peer(2, 30302);

        // A knows B's record and sends a ping with no keys
        let mut a_side = session_towards(&b);
        let (message, decoy) = send_ping(&mut a_side, &a, &b);

        // B cannot decrypt and challenges
        let mut b_side = Session::new(SessionKey::new(*a.local.id(), a.addr), None, 16);
        let challenge = expect_challenge(b_side.on_ordinary(&decoy, 2));
        assert_eq!(challenge.nonce(), decoy.nonce());
        assert!(matches!(b_side.state(), SessionState::ChallengeIssued));

        // A answers with a handshake carrying the ping
        let challenge = wire(&challenge, a.local.id());
        let reply = a_side.on_challenge(&challenge, &a.local).unwrap();
        assert_eq!(&reply.request_id, message.request_id());
        assert!(a_side.is_established());

        // B verifies, learns A's record from the handshake, and recovers the ping
        let handshake = wire(&reply.packet, b.local.id());
        let outcome = b_side
            .on_handshake(&handshake, &b.local, &V4Verifier, None)
            .unwrap();
        assert_eq!(outcome.message.unwrap(), message);
        assert_eq!(outcome.record.unwrap().node_id(), *a.local.id());
        assert!(b_side.is_established());

        // ordinary traffic now flows both ways
        let pong = pong_for(&message, &a);
        let sealed = wire(&b_side.seal(&pong, b.local.id()).unwrap(), a.local.id());
        match a_side.on_ordinary(&sealed, 2) {
            OrdinaryOutcome::Message(received) => assert_eq!(received, pong),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_handshake_without_challenge_is_rejected() {
        let a = peer(3, 30303);
        let b = peer(4, 30304);
        let mut b_side = Session::new(SessionKey::new(*a.local.id(), a.addr), None, 16);
        let packet = Packet::random_ordinary(*a.local.id());
        assert!(matches!(
            b_side.on_handshake(&packet, &b.local, &V4Verifier, None),
            Err(DiscoveryError::HandshakeVerification(_))
        ));
        assert_eq!(b_side.state(), &SessionState::Unestablished);
    }

    #[test]
    fn test_unmatched_challenge_is_rejected() {
        let a = peer(5, 30305);
        let b = peer(6, 30306);
        let mut a_side = session_towards(&b);
        let challenge = Packet::challenge([9u8; 12], [1u8; 16], 0);
        assert!(a_side.on_challenge(&challenge, &a.local).is_err());
        assert!(!a_side.is_established());
    }

    #[test]
    fn test_rechallenge_replaces_token() {
        let a = peer(7, 30307);
        let mut session = Session::new(SessionKey::new(*a.local.id(), a.addr), None, 16);
        session.issue_challenge([1u8; 12]);
        let first = session.challenge.clone().unwrap();
        session.issue_challenge([2u8; 12]);
        assert_ne!(Some(first), session.challenge);
        assert_eq!(session.state(), &SessionState::ChallengeIssued);
    }

    #[test]
    fn test_request_limit() {
        let a = peer(8, 30308);
        let mut session = Session::new(SessionKey::new(*a.local.id(), a.addr), None, 1);
        for expected_ok in [true, false] {
            let (message, id) = build_request(&Task::Ping, 1).unwrap();
            let (completion, _future) = Completion::new();
            let result =
                session.register_request(InFlightRequest::new(id, Task::Ping, message, completion));
            assert_eq!(result.is_ok(), expected_ok);
        }
        assert_eq!(session.pending_requests(), 1);
    }

    #[test]
    fn test_crossed_handshakes_agree_on_keys() {
        let a = peer(9, 30309);
        let b = peer(10, 30310);
        let mut a_side = session_towards(&b);
        let mut b_side = session_towards(&a);

        // both ping at once, without keys
        let (a_ping, a_decoy) = send_ping(&mut a_side, &a, &b);
        let (b_ping, b_decoy) = send_ping(&mut b_side, &b, &a);

        // each challenges the other's decoy
        let to_a = expect_challenge(b_side.on_ordinary(&a_decoy, 2));
        let to_b = expect_challenge(a_side.on_ordinary(&b_decoy, 2));

        // each answers the challenge it received
        let from_a = a_side.on_challenge(&wire(&to_a, a.local.id()), &a.local).unwrap();
        let from_b = b_side.on_challenge(&wire(&to_b, b.local.id()), &b.local).unwrap();

        // each completes the other's handshake and reads the ping inside
        let at_b = b_side
            .on_handshake(&wire(&from_a.packet, b.local.id()), &b.local, &V4Verifier, None)
            .unwrap();
        let at_a = a_side
            .on_handshake(&wire(&from_b.packet, a.local.id()), &a.local, &V4Verifier, None)
            .unwrap();
        assert_eq!(at_b.message.unwrap(), a_ping);
        assert_eq!(at_a.message.unwrap(), b_ping);

        // both ends hold the two halves of the same key pair
        let a_keys = a_side.keys.clone().unwrap();
        let b_keys = b_side.keys.clone().unwrap();
        assert_eq!(a_keys.encrypt, b_keys.decrypt);
        assert_eq!(a_keys.decrypt, b_keys.encrypt);

        // and the pongs go through
        let pong = pong_for(&b_ping, &b);
        let sealed = wire(&a_side.seal(&pong, a.local.id()).unwrap(), b.local.id());
        assert!(matches!(
            b_side.on_ordinary(&sealed, 2),
            OrdinaryOutcome::Message(received) if received == pong
        ));
        let pong = pong_for(&a_ping, &a);
        let sealed = wire(&b_side.seal(&pong, b.local.id()).unwrap(), a.local.id());
        assert!(matches!(
            a_side.on_ordinary(&sealed, 2),
            OrdinaryOutcome::Message(received) if received == pong
        ));
    }

    #[test]
    fn test_repeated_decrypt_failures_reset_session() {
        let a = peer(11, 30311);
        let b = peer(12, 30312);
        let (_, mut b_side) = established(&a, &b);

        let max_failures = 3;
        let (message, _) = build_request(&Task::Ping, 1).unwrap();
        let forged = |nonce: Nonce| {
            let header = PacketHeader {
                nonce,
                auth_data: AuthData::Ordinary {
                    src_id: *a.local.id(),
                },
            };
            wire(
                &Packet::sealed(header, &message, &[0x77; 32]).unwrap(),
                b.local.id(),
            )
        };

        for round in 1..max_failures {
            let outcome = b_side.on_ordinary(&forged([round as u8; 12]), max_failures);
            assert!(matches!(
                outcome,
                OrdinaryOutcome::Dropped(DiscoveryError::DecryptionFailure)
            ));
            assert!(b_side.is_established());
        }

        let last = forged([0xee; 12]);
        let challenge = expect_challenge(b_side.on_ordinary(&last, max_failures));
        assert_eq!(challenge.nonce(), last.nonce());
        assert_eq!(b_side.state(), &SessionState::ChallengeIssued);
        assert!(!b_side.is_established());
    }

    #[test]
    fn test_challenge_on_established_session_redoes_handshake() {
        let a = peer(13, 30313);
        let b = peer(14, 30314);
        let (mut a_side, _) = established(&a, &b);
        let old_keys = a_side.keys.clone().unwrap();

        // B restarted and lost its keys; A's sealed ping gets challenged
        let mut b_side = Session::new(SessionKey::new(*a.local.id(), a.addr), None, 16);
        let (ping, sealed) = send_ping(&mut a_side, &a, &b);
        let challenge = expect_challenge(b_side.on_ordinary(&sealed, 2));

        let reply = a_side
            .on_challenge(&wire(&challenge, a.local.id()), &a.local)
            .unwrap();
        assert_eq!(&reply.request_id, ping.request_id());
        assert_ne!(a_side.keys.clone().unwrap().encrypt, old_keys.encrypt);

        let outcome = b_side
            .on_handshake(&wire(&reply.packet, b.local.id()), &b.local, &V4Verifier, None)
            .unwrap();
        assert_eq!(outcome.message.unwrap(), ping);

        let pong = pong_for(&ping, &a);
        let sealed = wire(&b_side.seal(&pong, b.local.id()).unwrap(), a.local.id());
        assert!(matches!(
            a_side.on_ordinary(&sealed, 2),
            OrdinaryOutcome::Message(received) if received == pong
        ));
    }

    #[test]
    fn test_handshake_with_undecodable_message_installs_keys() {
        let a = peer(15, 30315);
        let b = peer(16, 30316);
        let mut a_side = session_towards(&b);
        let mut b_side = Session::new(SessionKey::new(*a.local.id(), a.addr), None, 16);
        let (ping, decoy) = send_ping(&mut a_side, &a, &b);
        let challenge = expect_challenge(b_side.on_ordinary(&decoy, 2));
        let reply = a_side
            .on_challenge(&wire(&challenge, a.local.id()), &a.local)
            .unwrap();

        // same handshake, but the sealed plaintext is a PING with a truncated body
        let mut handshake = reply.packet;
        let key = a_side.keys.clone().unwrap().encrypt;
        handshake.message =
            encrypt_message(&key, handshake.nonce(), &[0x01, 0xff], &handshake.message_ad())
                .unwrap();

        let outcome = b_side
            .on_handshake(&wire(&handshake, b.local.id()), &b.local, &V4Verifier, None)
            .unwrap();
        assert!(matches!(
            outcome.message,
            Err(DiscoveryError::MalformedMessage(_))
        ));
        assert!(outcome.record.is_some());
        assert!(b_side.is_established());

        let pong = pong_for(&ping, &a);
        let sealed = wire(&b_side.seal(&pong, b.local.id()).unwrap(), a.local.id());
        assert!(matches!(
            a_side.on_ordinary(&sealed, 2),
            OrdinaryOutcome::Message(received) if received == pong
        ));
    }
}
