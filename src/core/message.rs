//! Application messages carried inside packets.
//!
//! Plaintext layout: `message-type (1) || rlp(list of fields)`. NODES records stay
//! encoded until the dispatcher hands them to a record verifier.

use crate::error::{constants, DiscoveryError, Result};
use crate::node::record::EncodedRecord;
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use bytes::Bytes;
use crate::utils::crypto::random_array;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Maximum request id length in bytes
pub const MAX_REQUEST_ID_SIZE: usize = 8;

/// Highest meaningful log distance
pub const MAX_DISTANCE: u16 = 256;

/// Opaque request id chosen by the requester, echoed in the response.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Vec<u8>);

impl RequestId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() > MAX_REQUEST_ID_SIZE {
            return Err(DiscoveryError::MalformedMessage(
                constants::ERR_REQUEST_ID_TOO_LONG.into(),
            ));
        }
        Ok(Self(bytes))
    }

    /// Fresh random 8-byte id.
    pub fn random() -> Self {
        Self(random_array::<MAX_REQUEST_ID_SIZE>().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId(0x{})", hex::encode(&self.0))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

/// Wire codes of the recognized message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Ping = 0x01,
    Pong = 0x02,
    FindNode = 0x03,
    Nodes = 0x04,
    TalkRequest = 0x05,
    TalkResponse = 0x06,
}

impl MessageType {
    pub fn from_byte(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(MessageType::Ping),
            0x02 => Some(MessageType::Pong),
            0x03 => Some(MessageType::FindNode),
            0x04 => Some(MessageType::Nodes),
            0x05 => Some(MessageType::TalkRequest),
            0x06 => Some(MessageType::TalkResponse),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::FindNode => "FINDNODE",
            MessageType::Nodes => "NODES",
            MessageType::TalkRequest => "TALKREQ",
            MessageType::TalkResponse => "TALKRESP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping {
        request_id: RequestId,
        enr_seq: u64,
    },
    Pong {
        request_id: RequestId,
        enr_seq: u64,
        recipient_ip: IpAddr,
        recipient_port: u16,
    },
    FindNode {
        request_id: RequestId,
        distances: Vec<u16>,
    },
    Nodes {
        request_id: RequestId,
        total: u64,
        records: Vec<EncodedRecord>,
    },
    TalkRequest {
        request_id: RequestId,
        protocol: Vec<u8>,
        request: Vec<u8>,
    },
    TalkResponse {
        request_id: RequestId,
        response: Vec<u8>,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Ping { .. } => MessageType::Ping,
            Message::Pong { .. } => MessageType::Pong,
            Message::FindNode { .. } => MessageType::FindNode,
            Message::Nodes { .. } => MessageType::Nodes,
            Message::TalkRequest { .. } => MessageType::TalkRequest,
            Message::TalkResponse { .. } => MessageType::TalkResponse,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        match self {
            Message::Ping { request_id, .. }
            | Message::Pong { request_id, .. }
            | Message::FindNode { request_id, .. }
            | Message::Nodes { request_id, .. }
            | Message::TalkRequest { request_id, .. }
            | Message::TalkResponse { request_id, .. } => request_id,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let request_id = Bytes::copy_from_slice(self.request_id().as_bytes());
        let mut out = vec![self.message_type() as u8];
        match self {
            Message::Ping { enr_seq, .. } => PingBody {
                request_id,
                enr_seq: *enr_seq,
            }
            .encode(&mut out),
            Message::Pong {
                enr_seq,
                recipient_ip,
                recipient_port,
                ..
            } => {
                let recipient_ip = match recipient_ip {
                    IpAddr::V4(ip) => Bytes::copy_from_slice(&ip.octets()),
                    IpAddr::V6(ip) => Bytes::copy_from_slice(&ip.octets()),
                };
                PongBody {
                    request_id,
                    enr_seq: *enr_seq,
                    recipient_ip,
                    recipient_port: *recipient_port,
                }
                .encode(&mut out)
            }
            Message::FindNode { distances, .. } => FindNodeBody {
                request_id,
                distances: distances.clone(),
            }
            .encode(&mut out),
            Message::Nodes { total, records, .. } => NodesBody {
                request_id,
                total: *total,
                records: records.clone(),
            }
            .encode(&mut out),
            Message::TalkRequest {
                protocol, request, ..
            } => TalkRequestBody {
                request_id,
                protocol: Bytes::copy_from_slice(protocol),
                request: Bytes::copy_from_slice(request),
            }
            .encode(&mut out),
            Message::TalkResponse { response, .. } => TalkResponseBody {
                request_id,
                response: Bytes::copy_from_slice(response),
            }
            .encode(&mut out),
        }
        out
    }

    /// Decode a plaintext. Unknown type bytes are `UnsupportedMessageType`, everything
    /// else structurally wrong is `MalformedMessage`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&code, body) = bytes
            .split_first()
            .ok_or_else(|| DiscoveryError::MalformedMessage(constants::ERR_EMPTY_MESSAGE.into()))?;
        let kind =
            MessageType::from_byte(code).ok_or(DiscoveryError::UnsupportedMessageType(code))?;

        match kind {
            MessageType::Ping => {
                let body: PingBody = decode_body(body)?;
                Ok(Message::Ping {
                    request_id: RequestId::new(body.request_id.to_vec())?,
                    enr_seq: body.enr_seq,
                })
            }
            MessageType::Pong => {
                let body: PongBody = decode_body(body)?;
                Ok(Message::Pong {
                    request_id: RequestId::new(body.request_id.to_vec())?,
                    enr_seq: body.enr_seq,
                    recipient_ip: ip_address(&body.recipient_ip)?,
                    recipient_port: body.recipient_port,
                })
            }
            MessageType::FindNode => {
                let body: FindNodeBody = decode_body(body)?;
                if body.distances.iter().any(|d| *d > MAX_DISTANCE) {
                    return Err(malformed("distance above 256"));
                }
                Ok(Message::FindNode {
                    request_id: RequestId::new(body.request_id.to_vec())?,
                    distances: body.distances,
                })
            }
            MessageType::Nodes => {
                let body: NodesBody = decode_body(body)?;
                Ok(Message::Nodes {
                    request_id: RequestId::new(body.request_id.to_vec())?,
                    total: body.total,
                    records: body.records,
                })
            }
            MessageType::TalkRequest => {
                let body: TalkRequestBody = decode_body(body)?;
                Ok(Message::TalkRequest {
                    request_id: RequestId::new(body.request_id.to_vec())?,
                    protocol: body.protocol.to_vec(),
                    request: body.request.to_vec(),
                })
            }
            MessageType::TalkResponse => {
                let body: TalkResponseBody = decode_body(body)?;
                Ok(Message::TalkResponse {
                    request_id: RequestId::new(body.request_id.to_vec())?,
                    response: body.response.to_vec(),
                })
            }
        }
    }
}

#[derive(RlpEncodable, RlpDecodable)]
struct PingBody {
    request_id: Bytes,
    enr_seq: u64,
}

#[derive(RlpEncodable, RlpDecodable)]
struct PongBody {
    request_id: Bytes,
    enr_seq: u64,
    recipient_ip: Bytes,
    recipient_port: u16,
}

#[derive(RlpEncodable, RlpDecodable)]
struct FindNodeBody {
    request_id: Bytes,
    distances: Vec<u16>,
}

#[derive(RlpEncodable, RlpDecodable)]
struct NodesBody {
    request_id: Bytes,
    total: u64,
    records: Vec<EncodedRecord>,
}

#[derive(RlpEncodable, RlpDecodable)]
struct TalkRequestBody {
    request_id: Bytes,
    protocol: Bytes,
    request: Bytes,
}

#[derive(RlpEncodable, RlpDecodable)]
struct TalkResponseBody {
    request_id: Bytes,
    response: Bytes,
}

/// Decode exactly one body list; anything after it is malformed.
fn decode_body<T: Decodable>(mut body: &[u8]) -> Result<T> {
    let value = T::decode(&mut body)?;
    if !body.is_empty() {
        return Err(malformed(constants::ERR_TRAILING_BYTES));
    }
    Ok(value)
}

fn malformed(reason: &str) -> DiscoveryError {
    DiscoveryError::MalformedMessage(reason.into())
}

fn ip_address(bytes: &[u8]) -> Result<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        return Ok(IpAddr::V4(Ipv4Addr::from(octets)));
    }
    if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
        return Ok(IpAddr::V6(Ipv6Addr::from(octets)));
    }
    Err(malformed("recipient ip must be 4 or 16 bytes"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn malformed_err(bytes: &[u8]) -> bool {
        matches!(Message::decode(bytes), Err(DiscoveryError::MalformedMessage(_)))
    }

    #[test]
    fn test_ping_layout() {
        let ping = Message::Ping {
            request_id: RequestId::new(vec![0, 0, 0, 1]).unwrap(),
            enr_seq: 2,
        };
        // 0x01 || rlp([0x00000001, 2])
        assert_eq!(
            ping.encode(),
            vec![0x01, 0xc6, 0x84, 0x00, 0x00, 0x00, 0x01, 0x02]
        );
        assert_eq!(Message::decode(&ping.encode()).unwrap(), ping);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut bytes = Message::Ping {
            request_id: RequestId::new(vec![1]).unwrap(),
            enr_seq: 1,
        }
        .encode();
        bytes[0] = 111;
        assert!(matches!(
            Message::decode(&bytes),
            Err(DiscoveryError::UnsupportedMessageType(111))
        ));
    }

    #[test]
    fn test_empty_message_rejected() {
        assert!(malformed_err(&[]));
    }

    #[test]
    fn test_list_in_place_of_request_id_rejected() {
        assert!(malformed_err(&[0x01, 0xc2, 0xc0, 0x01]));
    }

    #[test]
    fn test_wrong_field_count_rejected() {
        // TALKRESP with only a request id
        assert!(malformed_err(&[0x06, 0xc1, 0x01]));
        // PING with an extra field
        assert!(malformed_err(&[0x01, 0xc3, 0x01, 0x01, 0x01]));
    }

    #[test]
    fn test_request_id_length_limit() {
        assert!(RequestId::new(vec![0u8; 9]).is_err());
        assert_eq!(RequestId::random().as_bytes().len(), MAX_REQUEST_ID_SIZE);
    }
}
