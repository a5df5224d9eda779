use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identifier length in bytes
pub const NODE_ID_SIZE: usize = 32;

/// 32-byte node identifier, derived from the node's public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; NODE_ID_SIZE]);

impl NodeId {
    pub const fn new(bytes: [u8; NODE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; NODE_ID_SIZE]>::try_from(bytes).ok().map(Self)
    }

    /// Parse from hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_SIZE] {
        &self.0
    }

    /// Header masking key: the first 16 bytes of the id.
    pub fn masking_key(&self) -> [u8; 16] {
        let mut key = [0u8; 16];
        key.copy_from_slice(&self.0[..16]);
        key
    }

    /// Logarithmic XOR distance, `0` for identical ids and `256` at most.
    pub fn log2_distance(&self, other: &NodeId) -> u16 {
        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            let xor = a ^ b;
            if xor != 0 {
                let bit = 8 - xor.leading_zeros() as u16;
                return (NODE_ID_SIZE - 1 - i) as u16 * 8 + bit;
            }
        }
        0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form keeps log lines readable
        write!(f, "NodeId(0x{}..)", hex::encode(&self.0[..4]))
    }
}

impl From<[u8; NODE_ID_SIZE]> for NodeId {
    fn from(bytes: [u8; NODE_ID_SIZE]) -> Self {
        Self(bytes)
    }
}
