//! Packet framing, header masking and message sealing.
//!
//! ```text
//! packet        = masking-iv (16) || masked-header || message
//! masked-header = aes128ctr(key = dest-id[..16], iv = masking-iv, header)
//! header        = static-header (23) || auth-data
//! static-header = "discv5" || version (2) || flag (1) || nonce (12) || authdata-size (2)
//! ```
//!
//! The message is sealed with ChaCha20-Poly1305 using the header nonce and
//! `masking-iv || header` as associated data, so every header byte is covered by the tag.

use crate::core::message::Message;
use crate::error::{constants, DiscoveryError, Result};
use crate::node::id::{NodeId, NODE_ID_SIZE};
use crate::utils::crypto::{
    decrypt_message, encrypt_message, random_array, random_bytes, HeaderMask, KEY_SIZE,
};
use bytes::Bytes;

pub const IV_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 12;
pub const ID_NONCE_SIZE: usize = 16;
pub const STATIC_HEADER_SIZE: usize = 23;
pub const MIN_PACKET_SIZE: usize = 63;
pub const MAX_PACKET_SIZE: usize = 1280;

pub const PROTOCOL_ID: &[u8; 6] = b"discv5";
pub const PROTOCOL_VERSION: u16 = 0x0001;

pub const FLAG_ORDINARY: u8 = 0;
pub const FLAG_CHALLENGE: u8 = 1;
pub const FLAG_HANDSHAKE: u8 = 2;

const CHALLENGE_AUTHDATA_SIZE: usize = ID_NONCE_SIZE + 8;
const HANDSHAKE_AUTHDATA_HEAD: usize = NODE_ID_SIZE + 2;

/// Size of the random payload carried by a decoy packet.
pub const RANDOM_MESSAGE_SIZE: usize = 20;

pub type Nonce = [u8; NONCE_SIZE];
pub type IdNonce = [u8; ID_NONCE_SIZE];

/// A datagram that passed the size checks but whose header is still masked.
#[derive(Debug, Clone)]
pub struct RawPacket {
    iv: [u8; IV_SIZE],
    masked: Bytes,
}

impl RawPacket {
    /// Validate the outer size bounds and split off the masking IV.
    pub fn decode(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes: Bytes = bytes.into();
        if bytes.len() < MIN_PACKET_SIZE {
            return Err(DiscoveryError::MalformedPacket(
                constants::ERR_PACKET_TOO_SMALL.into(),
            ));
        }
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(DiscoveryError::MalformedPacket(
                constants::ERR_PACKET_TOO_LARGE.into(),
            ));
        }

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&bytes[..IV_SIZE]);
        Ok(Self {
            iv,
            masked: bytes.slice(IV_SIZE..),
        })
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Remove the header mask using the receiving node's id and parse the header.
    ///
    /// A packet addressed to some other node demasks to garbage and fails the
    /// protocol-id check.
    pub fn demask(&self, local_id: &NodeId) -> Result<Packet> {
        let mut stream = HeaderMask::new(&local_id.masking_key(), &self.iv);

        let mut static_header = [0u8; STATIC_HEADER_SIZE];
        static_header.copy_from_slice(&self.masked[..STATIC_HEADER_SIZE]);
        stream.apply(&mut static_header);

        if &static_header[..6] != PROTOCOL_ID {
            return Err(DiscoveryError::MalformedPacket(
                constants::ERR_INVALID_PROTOCOL_ID.into(),
            ));
        }
        let version = u16::from_be_bytes([static_header[6], static_header[7]]);
        if version != PROTOCOL_VERSION {
            return Err(DiscoveryError::MalformedPacket(
                constants::ERR_INVALID_VERSION.into(),
            ));
        }
        let flag = static_header[8];
        if flag > FLAG_HANDSHAKE {
            return Err(DiscoveryError::UnknownPacketType(flag));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&static_header[9..21]);
        let auth_size = usize::from(u16::from_be_bytes([static_header[21], static_header[22]]));

        let header_end = STATIC_HEADER_SIZE + auth_size;
        if self.masked.len() < header_end {
            return Err(DiscoveryError::MalformedPacket(
                constants::ERR_AUTHDATA_TRUNCATED.into(),
            ));
        }
        let mut auth = self.masked[STATIC_HEADER_SIZE..header_end].to_vec();
        stream.apply(&mut auth);

        let auth_data = AuthData::decode(flag, &auth)?;
        let message = self.masked[header_end..].to_vec();
        if matches!(auth_data, AuthData::Challenge { .. }) && !message.is_empty() {
            return Err(DiscoveryError::MalformedPacket(
                constants::ERR_CHALLENGE_WITH_MESSAGE.into(),
            ));
        }

        Ok(Packet {
            iv: self.iv,
            header: PacketHeader { nonce, auth_data },
            message,
        })
    }
}

/// Flag-specific header payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthData {
    Ordinary {
        src_id: NodeId,
    },
    /// WHOAREYOU: sent in reply to a packet that could not be decrypted.
    Challenge {
        id_nonce: IdNonce,
        enr_seq: u64,
    },
    Handshake {
        src_id: NodeId,
        id_signature: Vec<u8>,
        ephemeral_key: Vec<u8>,
        record: Option<Vec<u8>>,
    },
}

impl AuthData {
    pub fn flag(&self) -> u8 {
        match self {
            AuthData::Ordinary { .. } => FLAG_ORDINARY,
            AuthData::Challenge { .. } => FLAG_CHALLENGE,
            AuthData::Handshake { .. } => FLAG_HANDSHAKE,
        }
    }

    /// Sender id for packet kinds that carry one.
    pub fn src_id(&self) -> Option<&NodeId> {
        match self {
            AuthData::Ordinary { src_id } | AuthData::Handshake { src_id, .. } => Some(src_id),
            AuthData::Challenge { .. } => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            AuthData::Ordinary { src_id } => src_id.as_bytes().to_vec(),
            AuthData::Challenge { id_nonce, enr_seq } => {
                let mut out = Vec::with_capacity(CHALLENGE_AUTHDATA_SIZE);
                out.extend_from_slice(id_nonce);
                out.extend_from_slice(&enr_seq.to_be_bytes());
                out
            }
            AuthData::Handshake {
                src_id,
                id_signature,
                ephemeral_key,
                record,
            } => {
                let record = record.as_deref().unwrap_or_default();
                let mut out = Vec::with_capacity(
                    HANDSHAKE_AUTHDATA_HEAD + id_signature.len() + ephemeral_key.len() + record.len(),
                );
                out.extend_from_slice(src_id.as_bytes());
                out.push(id_signature.len() as u8);
                out.push(ephemeral_key.len() as u8);
                out.extend_from_slice(id_signature);
                out.extend_from_slice(ephemeral_key);
                out.extend_from_slice(record);
                out
            }
        }
    }

    pub fn decode(flag: u8, bytes: &[u8]) -> Result<Self> {
        let size_error = || DiscoveryError::MalformedPacket(constants::ERR_AUTHDATA_SIZE.into());
        match flag {
            FLAG_ORDINARY => {
                let src_id = NodeId::from_slice(bytes).ok_or_else(size_error)?;
                Ok(AuthData::Ordinary { src_id })
            }
            FLAG_CHALLENGE => {
                if bytes.len() != CHALLENGE_AUTHDATA_SIZE {
                    return Err(size_error());
                }
                let mut id_nonce = [0u8; ID_NONCE_SIZE];
                id_nonce.copy_from_slice(&bytes[..ID_NONCE_SIZE]);
                let mut seq = [0u8; 8];
                seq.copy_from_slice(&bytes[ID_NONCE_SIZE..]);
                Ok(AuthData::Challenge {
                    id_nonce,
                    enr_seq: u64::from_be_bytes(seq),
                })
            }
            FLAG_HANDSHAKE => {
                if bytes.len() < HANDSHAKE_AUTHDATA_HEAD {
                    return Err(size_error());
                }
                let src_id = NodeId::from_slice(&bytes[..NODE_ID_SIZE]).ok_or_else(size_error)?;
                let sig_size = usize::from(bytes[NODE_ID_SIZE]);
                let key_size = usize::from(bytes[NODE_ID_SIZE + 1]);
                let key_end = HANDSHAKE_AUTHDATA_HEAD + sig_size + key_size;
                if bytes.len() < key_end {
                    return Err(size_error());
                }
                let sig_end = HANDSHAKE_AUTHDATA_HEAD + sig_size;
                let record = &bytes[key_end..];
                Ok(AuthData::Handshake {
                    src_id,
                    id_signature: bytes[HANDSHAKE_AUTHDATA_HEAD..sig_end].to_vec(),
                    ephemeral_key: bytes[sig_end..key_end].to_vec(),
                    record: (!record.is_empty()).then(|| record.to_vec()),
                })
            }
            other => Err(DiscoveryError::UnknownPacketType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub nonce: Nonce,
    pub auth_data: AuthData,
}

impl PacketHeader {
    /// Unmasked header bytes: static header followed by auth-data.
    pub fn encode(&self) -> Vec<u8> {
        let auth = self.auth_data.encode();
        let mut out = Vec::with_capacity(STATIC_HEADER_SIZE + auth.len());
        out.extend_from_slice(PROTOCOL_ID);
        out.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        out.push(self.auth_data.flag());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&(auth.len() as u16).to_be_bytes());
        out.extend_from_slice(&auth);
        out
    }
}

/// A demasked packet. `message` is still sealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub iv: [u8; IV_SIZE],
    pub header: PacketHeader,
    pub message: Vec<u8>,
}

impl Packet {
    /// Packet with a fresh random masking IV.
    pub fn new(header: PacketHeader, message: Vec<u8>) -> Self {
        Self {
            iv: random_array(),
            header,
            message,
        }
    }

    /// Build a packet whose message is sealed under `key`.
    pub fn sealed(header: PacketHeader, message: &Message, key: &[u8; KEY_SIZE]) -> Result<Self> {
        let mut packet = Self::new(header, Vec::new());
        packet.message = encrypt_message(
            key,
            &packet.header.nonce,
            &message.encode(),
            &packet.message_ad(),
        )?;
        Ok(packet)
    }

    /// Challenge answering the packet that carried `nonce`.
    pub fn challenge(nonce: Nonce, id_nonce: IdNonce, enr_seq: u64) -> Self {
        Self::new(
            PacketHeader {
                nonce,
                auth_data: AuthData::Challenge { id_nonce, enr_seq },
            },
            Vec::new(),
        )
    }

    /// Ordinary packet with random message bytes, sent to provoke a challenge when no
    /// session keys exist yet. On the wire it is indistinguishable from a real one.
    pub fn random_ordinary(src_id: NodeId) -> Self {
        Self::new(
            PacketHeader {
                nonce: random_array(),
                auth_data: AuthData::Ordinary { src_id },
            },
            random_bytes(RANDOM_MESSAGE_SIZE),
        )
    }

    pub fn nonce(&self) -> &Nonce {
        &self.header.nonce
    }

    pub fn auth_data(&self) -> &AuthData {
        &self.header.auth_data
    }

    /// `masking-iv || header`: the AEAD associated data. For a challenge packet these
    /// bytes are the challenge-data fed into key derivation and the id signature.
    pub fn message_ad(&self) -> Vec<u8> {
        let header = self.header.encode();
        let mut out = Vec::with_capacity(IV_SIZE + header.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&header);
        out
    }

    /// Open and parse the message with the given receive key.
    pub fn decrypt_message(&self, key: &[u8; KEY_SIZE]) -> Result<Message> {
        let plaintext = decrypt_message(key, &self.header.nonce, &self.message, &self.message_ad())?;
        Message::decode(&plaintext)
    }

    /// Wire bytes for a packet addressed to `dest`.
    pub fn encode(&self, dest: &NodeId) -> Vec<u8> {
        let mut header = self.header.encode();
        let mut out = Vec::with_capacity(IV_SIZE + header.len() + self.message.len());
        HeaderMask::new(&dest.masking_key(), &self.iv).apply(&mut header);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.message);
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::message::RequestId;

    fn dest() -> NodeId {
        NodeId::new([0xbb; 32])
    }

    fn ping() -> Message {
        Message::Ping {
            request_id: RequestId::new(vec![0, 0, 0, 1]).unwrap(),
            enr_seq: 2,
        }
    }

    #[test]
    fn test_challenge_packet_is_minimum_size() {
        let packet = Packet::challenge([1u8; NONCE_SIZE], [2u8; ID_NONCE_SIZE], 0);
        let bytes = packet.encode(&dest());
        assert_eq!(bytes.len(), MIN_PACKET_SIZE);

        let decoded = RawPacket::decode(bytes).unwrap().demask(&dest()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_sealed_ordinary_round_trip() {
        let key = [9u8; KEY_SIZE];
        let header = PacketHeader {
            nonce: [5u8; NONCE_SIZE],
            auth_data: AuthData::Ordinary {
                src_id: NodeId::new([0xaa; 32]),
            },
        };
        let packet = Packet::sealed(header, &ping(), &key).unwrap();
        let decoded = RawPacket::decode(packet.encode(&dest()))
            .unwrap()
            .demask(&dest())
            .unwrap();
        assert_eq!(decoded.decrypt_message(&key).unwrap(), ping());
    }

    #[test]
    fn test_wrong_destination_fails_demask() {
        let packet = Packet::random_ordinary(NodeId::new([0xaa; 32]));
        let bytes = packet.encode(&dest());
        let raw = RawPacket::decode(bytes).unwrap();
        assert!(matches!(
            raw.demask(&NodeId::new([0xcc; 32])),
            Err(DiscoveryError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_size_bounds() {
        assert!(RawPacket::decode(vec![0u8; MIN_PACKET_SIZE - 1]).is_err());
        assert!(RawPacket::decode(vec![0u8; MAX_PACKET_SIZE + 1]).is_err());
        assert!(RawPacket::decode(vec![0u8; MAX_PACKET_SIZE]).is_ok());
    }

    #[test]
    fn test_unknown_flag() {
        let mut header = PacketHeader {
            nonce: [0u8; NONCE_SIZE],
            auth_data: AuthData::Ordinary {
                src_id: NodeId::new([1; 32]),
            },
        }
        .encode();
        header[8] = 7;
        let iv = [3u8; IV_SIZE];
        HeaderMask::new(&dest().masking_key(), &iv).apply(&mut header);
        let mut bytes = iv.to_vec();
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&[0u8; 16]);

        assert!(matches!(
            RawPacket::decode(bytes).unwrap().demask(&dest()),
            Err(DiscoveryError::UnknownPacketType(7))
        ));
    }

    #[test]
    fn test_handshake_auth_data_layout() {
        let auth = AuthData::Handshake {
            src_id: NodeId::new([4; 32]),
            id_signature: vec![1; 64],
            ephemeral_key: vec![2; 33],
            record: None,
        };
        let bytes = auth.encode();
        assert_eq!(bytes.len(), 32 + 2 + 64 + 33);
        assert_eq!(bytes[32], 64);
        assert_eq!(bytes[33], 33);
        assert_eq!(AuthData::decode(FLAG_HANDSHAKE, &bytes).unwrap(), auth);

        assert!(AuthData::decode(FLAG_HANDSHAKE, &bytes[..90]).is_err());
    }

    #[test]
    fn test_tampered_header_breaks_tag() {
        let key = [9u8; KEY_SIZE];
        let header = PacketHeader {
            nonce: [5u8; NONCE_SIZE],
            auth_data: AuthData::Ordinary {
                src_id: NodeId::new([0xaa; 32]),
            },
        };
        let mut packet = Packet::sealed(header, &ping(), &key).unwrap();
        packet.iv[0] ^= 1;
        assert!(matches!(
            packet.decrypt_message(&key),
            Err(DiscoveryError::DecryptionFailure)
        ));
    }
}
