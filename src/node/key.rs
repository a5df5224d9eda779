//! Static secp256k1 identity key of the local node.

use crate::error::{constants, DiscoveryError, Result};
use crate::node::id::NodeId;
use crate::utils::crypto::os_random;
use k256::ecdsa::{SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use std::fmt;
use zeroize::Zeroize;

/// Compressed secp256k1 public key length
pub const PUBLIC_KEY_SIZE: usize = 33;

/// The node's long-term signing and key-agreement key.
#[derive(Clone)]
pub struct NodeKey {
    signing: SigningKey,
}

impl NodeKey {
    /// Generate a fresh key from the operating system's random source.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; 32];
        loop {
            os_random(&mut bytes)?;
            // out-of-range scalars are astronomically rare, draw again
            if let Ok(signing) = SigningKey::from_slice(&bytes) {
                bytes.zeroize();
                return Ok(Self { signing });
            }
        }
    }

    pub fn from_bytes(secret: &[u8]) -> Result<Self> {
        SigningKey::from_slice(secret)
            .map(|signing| Self { signing })
            .map_err(|_| DiscoveryError::ConfigError("invalid secp256k1 secret key".into()))
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn node_id(&self) -> NodeId {
        node_id_from_public_key(self.verifying_key())
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeKey")
            .field("node_id", &self.node_id())
            .finish_non_exhaustive()
    }
}

/// `v4` node id: keccak256 of the uncompressed public key without its 0x04 prefix.
pub fn node_id_from_public_key(key: &VerifyingKey) -> NodeId {
    let point = key.to_encoded_point(false);
    let hash: [u8; 32] = Keccak256::digest(&point.as_bytes()[1..]).into();
    NodeId::new(hash)
}

pub fn compressed_public_key(key: &VerifyingKey) -> [u8; PUBLIC_KEY_SIZE] {
    let point = key.to_encoded_point(true);
    let mut out = [0u8; PUBLIC_KEY_SIZE];
    out.copy_from_slice(point.as_bytes());
    out
}

pub fn parse_public_key(bytes: &[u8]) -> Result<VerifyingKey> {
    VerifyingKey::from_sec1_bytes(bytes)
        .map_err(|_| DiscoveryError::InvalidRecord(constants::ERR_RECORD_SCHEME.into()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_is_stable_for_key() {
        let key = NodeKey::from_bytes(&[0x11; 32]).unwrap();
        assert_eq!(key.node_id(), key.clone().node_id());
        let parsed = parse_public_key(&compressed_public_key(key.verifying_key())).unwrap();
        assert_eq!(node_id_from_public_key(&parsed), key.node_id());
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = NodeKey::generate().unwrap();
        let b = NodeKey::generate().unwrap();
        assert_ne!(a.node_id(), b.node_id());
    }

    #[test]
    fn test_zero_secret_rejected() {
        assert!(NodeKey::from_bytes(&[0u8; 32]).is_err());
    }
}
