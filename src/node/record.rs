//! Signed node records and the record-verification boundary.
//!
//! Records are `v4` ENRs. Encoding, key ordering and the secp256k1 signature are
//! handled by the `enr` crate; this module adds the size limit, the UDP endpoint
//! lookup and the opaque [`EncodedRecord`] carried inside NODES messages.

use crate::error::{constants, DiscoveryError, Result};
use crate::node::id::NodeId;
use crate::node::key::NodeKey;
use alloy_rlp::{BufMut, Decodable, Encodable, Header};
use bytes::Bytes;
use k256::ecdsa::{SigningKey, VerifyingKey};
use std::net::SocketAddr;

/// Maximum encoded record size in bytes
pub const MAX_RECORD_SIZE: usize = 300;

/// Identity scheme tag of secp256k1 records
pub const IDENTITY_SCHEME_V4: &str = "v4";

type Enr = enr::Enr<SigningKey>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    enr: Enr,
}

impl NodeRecord {
    pub fn builder() -> NodeRecordBuilder {
        NodeRecordBuilder::default()
    }

    pub fn seq(&self) -> u64 {
        self.enr.seq()
    }

    pub fn signature(&self) -> &[u8] {
        self.enr.signature()
    }

    pub fn identity_scheme(&self) -> Option<String> {
        self.enr.id()
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.enr.public_key()
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.enr.node_id().raw())
    }

    /// UDP endpoint, preferring IPv4.
    pub fn udp_address(&self) -> Option<SocketAddr> {
        self.enr
            .udp4_socket()
            .map(SocketAddr::V4)
            .or_else(|| self.enr.udp6_socket().map(SocketAddr::V6))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        alloy_rlp::encode(&self.enr)
    }

    /// Decode a record and check its signature. Trailing bytes are rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_RECORD_SIZE {
            return Err(DiscoveryError::InvalidRecord(
                constants::ERR_RECORD_TOO_LARGE.into(),
            ));
        }
        let mut buf = bytes;
        let enr = Enr::decode(&mut buf).map_err(|e| DiscoveryError::InvalidRecord(e.to_string()))?;
        if !buf.is_empty() {
            return Err(DiscoveryError::InvalidRecord(
                constants::ERR_TRAILING_BYTES.into(),
            ));
        }
        Ok(Self { enr })
    }
}

/// Builds and signs a `v4` record for the local node.
#[derive(Debug, Default)]
pub struct NodeRecordBuilder {
    seq: u64,
    udp: Option<SocketAddr>,
}

impl NodeRecordBuilder {
    pub fn seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn udp(mut self, addr: SocketAddr) -> Self {
        self.udp = Some(addr);
        self
    }

    pub fn sign(self, key: &NodeKey) -> Result<NodeRecord> {
        let mut builder = Enr::builder();
        builder.seq(self.seq);
        match self.udp {
            Some(SocketAddr::V4(addr)) => {
                builder.ip4(*addr.ip()).udp4(addr.port());
            }
            Some(SocketAddr::V6(addr)) => {
                builder.ip6(*addr.ip()).udp6(addr.port());
            }
            None => {}
        }
        let enr = builder
            .build(key.signing_key())
            .map_err(|e| DiscoveryError::InvalidRecord(format!("{e:?}")))?;
        Ok(NodeRecord { enr })
    }
}

/// One record as it travels inside a NODES message: a single RLP list, kept
/// undecoded until a [`RecordVerifier`] accepts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord(Bytes);

impl EncodedRecord {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&NodeRecord> for EncodedRecord {
    fn from(record: &NodeRecord) -> Self {
        Self(Bytes::from(record.to_bytes()))
    }
}

impl Encodable for EncodedRecord {
    fn encode(&self, out: &mut dyn BufMut) {
        out.put_slice(&self.0);
    }

    fn length(&self) -> usize {
        self.0.len()
    }
}

impl Decodable for EncodedRecord {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let mut payload = *buf;
        let header = Header::decode(&mut payload)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let size = buf.len() - payload.len() + header.payload_length;
        if size > MAX_RECORD_SIZE {
            return Err(alloy_rlp::Error::Custom(constants::ERR_RECORD_TOO_LARGE));
        }
        if buf.len() < size {
            return Err(alloy_rlp::Error::InputTooShort);
        }
        let (item, rest) = buf.split_at(size);
        *buf = rest;
        Ok(Self(Bytes::copy_from_slice(item)))
    }
}

/// Turns record bytes received from the network into a trusted record.
pub trait RecordVerifier: Send + Sync {
    fn verify_and_parse(&self, bytes: &[u8]) -> Result<NodeRecord>;
}

/// Verifier for secp256k1 (`v4`) records.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4Verifier;

impl RecordVerifier for V4Verifier {
    fn verify_and_parse(&self, bytes: &[u8]) -> Result<NodeRecord> {
        let record = NodeRecord::from_bytes(bytes)?;
        if record.identity_scheme().as_deref() != Some(IDENTITY_SCHEME_V4) {
            return Err(DiscoveryError::InvalidRecord(
                constants::ERR_RECORD_SCHEME.into(),
            ));
        }
        Ok(record)
    }
}
