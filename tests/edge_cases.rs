#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Boundary conditions of the wire format: size limits, header fields,
//! auth-data lengths and non-canonical message encodings.

use bytes::{Bytes, BytesMut};
use discovery_protocol::core::message::{Message, RequestId, MAX_REQUEST_ID_SIZE};
use discovery_protocol::core::packet::{
    RawPacket, FLAG_CHALLENGE, FLAG_HANDSHAKE, FLAG_ORDINARY, IV_SIZE, MAX_PACKET_SIZE,
    MIN_PACKET_SIZE, PROTOCOL_ID,
};
use discovery_protocol::error::{constants, DiscoveryError};
use discovery_protocol::node::NodeId;
use discovery_protocol::transport::DatagramCodec;
use discovery_protocol::utils::crypto::mask;
use tokio_util::codec::{Decoder, Encoder};

const LOCAL: NodeId = NodeId::new([0x42; 32]);
const IV: [u8; IV_SIZE] = [0x10; IV_SIZE];

/// Build a masked datagram by hand so header fields can hold any value.
fn datagram(version: u16, flag: u8, declared_auth: u16, auth: &[u8], message: &[u8]) -> Vec<u8> {
    let mut header = Vec::new();
    header.extend_from_slice(PROTOCOL_ID);
    header.extend_from_slice(&version.to_be_bytes());
    header.push(flag);
    header.extend_from_slice(&[0x33; 12]);
    header.extend_from_slice(&declared_auth.to_be_bytes());
    header.extend_from_slice(auth);
    mask(&LOCAL.masking_key(), &IV, &mut header);

    let mut out = IV.to_vec();
    out.extend_from_slice(&header);
    out.extend_from_slice(message);
    out
}

fn demask(bytes: Vec<u8>) -> Result<(), DiscoveryError> {
    RawPacket::decode(bytes)?.demask(&LOCAL).map(|_| ())
}

fn packet_reason(result: Result<(), DiscoveryError>) -> String {
    match result {
        Err(DiscoveryError::MalformedPacket(reason)) => reason,
        other => panic!("expected a malformed packet, got {other:?}"),
    }
}

#[test]
fn test_packet_size_bounds() {
    let err = RawPacket::decode(vec![0u8; MIN_PACKET_SIZE - 1]).unwrap_err();
    assert!(matches!(err, DiscoveryError::MalformedPacket(ref r) if r == constants::ERR_PACKET_TOO_SMALL));
    assert!(RawPacket::decode(vec![0u8; MIN_PACKET_SIZE]).is_ok());

    assert!(RawPacket::decode(vec![0u8; MAX_PACKET_SIZE]).is_ok());
    let err = RawPacket::decode(vec![0u8; MAX_PACKET_SIZE + 1]).unwrap_err();
    assert!(matches!(err, DiscoveryError::MalformedPacket(ref r) if r == constants::ERR_PACKET_TOO_LARGE));
}

#[test]
fn test_smallest_ordinary_packet_is_valid() {
    // iv + static header + src-id leaves room for exactly a bare tag
    let bytes = datagram(1, FLAG_ORDINARY, 32, &[0x01; 32], &[0u8; 16]);
    assert_eq!(bytes.len(), 87);
    assert!(demask(bytes).is_ok());
}

#[test]
fn test_wrong_version_is_rejected() {
    let bytes = datagram(2, FLAG_ORDINARY, 32, &[0x01; 32], &[0u8; 16]);
    assert_eq!(packet_reason(demask(bytes)), constants::ERR_INVALID_VERSION);
}

#[test]
fn test_unknown_flag_is_rejected() {
    for flag in [3u8, 0x7f, 0xff] {
        let bytes = datagram(1, flag, 32, &[0x01; 32], &[0u8; 16]);
        assert!(matches!(
            demask(bytes),
            Err(DiscoveryError::UnknownPacketType(f)) if f == flag
        ));
    }
}

#[test]
fn test_declared_auth_size_beyond_packet() {
    let bytes = datagram(1, FLAG_ORDINARY, 1000, &[0x01; 32], &[0u8; 16]);
    assert_eq!(packet_reason(demask(bytes)), constants::ERR_AUTHDATA_TRUNCATED);
}

#[test]
fn test_auth_data_size_must_match_kind() {
    // ordinary auth-data is exactly one node id
    let bytes = datagram(1, FLAG_ORDINARY, 31, &[0x01; 31], &[0u8; 16]);
    assert_eq!(packet_reason(demask(bytes)), constants::ERR_AUTHDATA_SIZE);
    let bytes = datagram(1, FLAG_ORDINARY, 33, &[0x01; 33], &[0u8; 16]);
    assert_eq!(packet_reason(demask(bytes)), constants::ERR_AUTHDATA_SIZE);

    // challenge auth-data is id-nonce plus sequence number
    let bytes = datagram(1, FLAG_CHALLENGE, 23, &[0x01; 23], &[0u8; 24]);
    assert_eq!(packet_reason(demask(bytes)), constants::ERR_AUTHDATA_SIZE);

    // handshake sizes declare more key bytes than exist
    let mut auth = vec![0x01; 32];
    auth.extend_from_slice(&[64, 33]);
    auth.extend_from_slice(&[0u8; 64]);
    let bytes = datagram(1, FLAG_HANDSHAKE, auth.len() as u16, &auth, &[0u8; 16]);
    assert_eq!(packet_reason(demask(bytes)), constants::ERR_AUTHDATA_SIZE);
}

#[test]
fn test_challenge_must_not_carry_message() {
    let auth = [0x05; 24];
    assert!(demask(datagram(1, FLAG_CHALLENGE, 24, &auth, &[])).is_ok());
    let bytes = datagram(1, FLAG_CHALLENGE, 24, &auth, &[0x00]);
    assert_eq!(packet_reason(demask(bytes)), constants::ERR_CHALLENGE_WITH_MESSAGE);
}

#[test]
fn test_request_id_length_limit() {
    assert!(RequestId::new(vec![0xab; MAX_REQUEST_ID_SIZE]).is_ok());
    assert!(matches!(
        RequestId::new(vec![0xab; MAX_REQUEST_ID_SIZE + 1]),
        Err(DiscoveryError::MalformedMessage(_))
    ));

    // PING [id(9 bytes), 1]
    let mut plaintext = vec![0x01, 0xcb, 0x89];
    plaintext.extend_from_slice(&[0xab; 9]);
    plaintext.push(0x01);
    assert!(matches!(
        Message::decode(&plaintext),
        Err(DiscoveryError::MalformedMessage(_))
    ));
}

fn assert_malformed(plaintext: &[u8]) {
    assert!(
        matches!(Message::decode(plaintext), Err(DiscoveryError::MalformedMessage(_))),
        "accepted {}",
        hex::encode(plaintext)
    );
}

#[test]
fn test_non_canonical_encodings_are_rejected() {
    // sanity: canonical PING [[], 1]
    assert!(Message::decode(&[0x01, 0xc2, 0x80, 0x01]).is_ok());

    // sequence number with a leading zero byte
    assert_malformed(&[0x01, 0xc4, 0x80, 0x82, 0x00, 0x01]);
    // single byte below 0x80 wrapped in a string prefix
    assert_malformed(&[0x01, 0xc3, 0x80, 0x81, 0x05]);
    // long-form length for a short list
    assert_malformed(&[0x01, 0xf8, 0x02, 0x80, 0x01]);
    // trailing byte after the field list
    assert_malformed(&[0x01, 0xc2, 0x80, 0x01, 0x00]);
    // nine byte integer
    let mut wide = vec![0x01, 0xcb, 0x80, 0x89];
    wide.extend_from_slice(&[0xff; 9]);
    assert_malformed(&wide);
    // list payload shorter than declared
    assert_malformed(&[0x01, 0xc5, 0x80, 0x01]);
}

#[test]
fn test_field_ranges_are_checked() {
    // FINDNODE [[], [257]]
    assert_malformed(&[0x03, 0xc5, 0x80, 0xc3, 0x82, 0x01, 0x01]);
    // FINDNODE [[], [256]] is the largest legal distance
    assert!(Message::decode(&[0x03, 0xc5, 0x80, 0xc3, 0x82, 0x01, 0x00]).is_ok());
    // PONG with a five byte address
    assert_malformed(&[0x02, 0xcb, 0x80, 0x01, 0x85, 1, 2, 3, 4, 5, 0x82, 0x75, 0x5f]);
    // PONG with a port above 65535
    assert_malformed(&[0x02, 0xcb, 0x80, 0x01, 0x84, 127, 0, 0, 1, 0x83, 0x01, 0x00, 0x00]);
    // PING with a field missing
    assert_malformed(&[0x01, 0xc1, 0x80]);
    // PING whose body is not a list
    assert_malformed(&[0x01, 0x80]);
}

#[test]
fn test_datagram_codec_limits() {
    let mut codec = DatagramCodec;

    let mut buf = BytesMut::from(&vec![7u8; MAX_PACKET_SIZE][..]);
    assert_eq!(codec.decode(&mut buf).unwrap().unwrap().len(), MAX_PACKET_SIZE);

    let mut out = BytesMut::new();
    codec
        .encode(Bytes::from(vec![7u8; MAX_PACKET_SIZE]), &mut out)
        .unwrap();
    assert_eq!(out.len(), MAX_PACKET_SIZE);

    let mut buf = BytesMut::from(&vec![7u8; MAX_PACKET_SIZE + 1][..]);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(DiscoveryError::MalformedPacket(_))
    ));
}
