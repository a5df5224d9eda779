//! Handshake cryptography: ECDH, key derivation and identity proofs.
//!
//! The initiator is the node that sent the packet which triggered a challenge. It
//! answers the challenge with an ephemeral public key and a signature over the
//! challenge-data, and both sides derive the same pair of session keys:
//!
//! ```text
//! secret          = ecdh(ephemeral-key, recipient-static-key)
//! initiator-key ||
//! recipient-key   = hkdf-sha256(ikm = secret, salt = challenge-data,
//!                               info = "discovery v5 key agreement" || initiator-id || recipient-id)
//! id-signature    = sign(sha256("discovery v5 identity proof" || challenge-data ||
//!                               ephemeral-pubkey || recipient-id))
//! ```
//!
//! The initiator encrypts with `initiator-key` and the recipient with `recipient-key`.
//! All key material is zeroized when dropped.

use crate::error::{constants, DiscoveryError, Result};
use crate::node::id::NodeId;
use crate::node::key::{compressed_public_key, parse_public_key, NodeKey, PUBLIC_KEY_SIZE};
use crate::utils::crypto::{os_random, KEY_SIZE};
use hkdf::Hkdf;
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_AGREEMENT_INFO: &[u8] = b"discovery v5 key agreement";
pub const ID_SIGNATURE_TEXT: &[u8] = b"discovery v5 identity proof";

/// Length of an `r || s` id signature
pub const ID_SIGNATURE_SIZE: usize = 64;

/// Both keys produced by one handshake.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub initiator_key: [u8; KEY_SIZE],
    pub recipient_key: [u8; KEY_SIZE],
}

impl SessionKeys {
    pub fn for_initiator(&self) -> DirectionalKeys {
        DirectionalKeys {
            encrypt: self.initiator_key,
            decrypt: self.recipient_key,
        }
    }

    pub fn for_recipient(&self) -> DirectionalKeys {
        DirectionalKeys {
            encrypt: self.recipient_key,
            decrypt: self.initiator_key,
        }
    }
}

/// Keys as seen from one side of a session.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DirectionalKeys {
    pub encrypt: [u8; KEY_SIZE],
    pub decrypt: [u8; KEY_SIZE],
}

impl std::fmt::Debug for DirectionalKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DirectionalKeys(..)")
    }
}

/// Per-handshake secp256k1 key, discarded once the keys are derived.
pub struct EphemeralKey {
    secret: SigningKey,
}

impl EphemeralKey {
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; 32];
        loop {
            os_random(&mut bytes)?;
            if let Ok(secret) = SigningKey::from_slice(&bytes) {
                bytes.zeroize();
                return Ok(Self { secret });
            }
        }
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        compressed_public_key(self.secret.verifying_key())
    }
}

/// x-coordinate of the shared point.
pub fn ecdh(secret: &SigningKey, public: &VerifyingKey) -> [u8; 32] {
    let shared = k256::ecdh::diffie_hellman(secret.as_nonzero_scalar(), public.as_affine());
    let mut out = [0u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes());
    out
}

pub fn derive_keys(
    secret: &[u8; 32],
    initiator_id: &NodeId,
    recipient_id: &NodeId,
    challenge_data: &[u8],
) -> Result<SessionKeys> {
    let mut info = Vec::with_capacity(KEY_AGREEMENT_INFO.len() + 64);
    info.extend_from_slice(KEY_AGREEMENT_INFO);
    info.extend_from_slice(initiator_id.as_bytes());
    info.extend_from_slice(recipient_id.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(challenge_data), secret);
    let mut okm = [0u8; 2 * KEY_SIZE];
    hk.expand(&info, &mut okm)
        .map_err(|e| DiscoveryError::HandshakeVerification(e.to_string()))?;

    let mut keys = SessionKeys {
        initiator_key: [0u8; KEY_SIZE],
        recipient_key: [0u8; KEY_SIZE],
    };
    keys.initiator_key.copy_from_slice(&okm[..KEY_SIZE]);
    keys.recipient_key.copy_from_slice(&okm[KEY_SIZE..]);
    okm.zeroize();
    Ok(keys)
}

fn id_signature_digest(challenge_data: &[u8], ephemeral_key: &[u8], dest_id: &NodeId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(ID_SIGNATURE_TEXT);
    hasher.update(challenge_data);
    hasher.update(ephemeral_key);
    hasher.update(dest_id.as_bytes());
    hasher.finalize().into()
}

/// Prove ownership of the static key to `dest_id`.
pub fn id_sign(
    key: &SigningKey,
    challenge_data: &[u8],
    ephemeral_key: &[u8],
    dest_id: &NodeId,
) -> Result<[u8; ID_SIGNATURE_SIZE]> {
    let digest = id_signature_digest(challenge_data, ephemeral_key, dest_id);
    let signature: Signature = key
        .sign_prehash(&digest)
        .map_err(|e| DiscoveryError::HandshakeVerification(e.to_string()))?;
    let mut out = [0u8; ID_SIGNATURE_SIZE];
    out.copy_from_slice(&signature.to_bytes());
    Ok(out)
}

pub fn id_verify(
    key: &VerifyingKey,
    challenge_data: &[u8],
    ephemeral_key: &[u8],
    dest_id: &NodeId,
    signature: &[u8],
) -> Result<()> {
    let invalid =
        || DiscoveryError::HandshakeVerification(constants::ERR_INVALID_ID_SIGNATURE.into());
    let signature = Signature::from_slice(signature).map_err(|_| invalid())?;
    let digest = id_signature_digest(challenge_data, ephemeral_key, dest_id);
    key.verify_prehash(&digest, &signature).map_err(|_| invalid())
}

/// What the initiator puts into its handshake packet.
pub struct InitiatorHandshake {
    pub keys: DirectionalKeys,
    pub id_signature: [u8; ID_SIGNATURE_SIZE],
    pub ephemeral_key: [u8; PUBLIC_KEY_SIZE],
}

/// Answer a challenge: fresh ephemeral key, id proof, and the initiator's view of the keys.
#[instrument(skip(local_key, remote_key, challenge_data), fields(remote = %remote_id))]
pub fn initiate(
    local_key: &NodeKey,
    remote_id: &NodeId,
    remote_key: &VerifyingKey,
    challenge_data: &[u8],
) -> Result<InitiatorHandshake> {
    let ephemeral = EphemeralKey::generate()?;
    let ephemeral_key = ephemeral.public_key();

    let mut secret = ecdh(&ephemeral.secret, remote_key);
    let keys = derive_keys(&secret, &local_key.node_id(), remote_id, challenge_data);
    secret.zeroize();
    let keys = keys?;

    let id_signature = id_sign(
        local_key.signing_key(),
        challenge_data,
        &ephemeral_key,
        remote_id,
    )?;

    debug!("Initiator derived session keys");
    Ok(InitiatorHandshake {
        keys: keys.for_initiator(),
        id_signature,
        ephemeral_key,
    })
}

/// Check a handshake received in reply to our challenge and derive the recipient's keys.
///
/// `remote_key` is the static key from the record we hold (or the one embedded in the
/// handshake). Nothing is committed here; the caller installs the keys only once the
/// carried message also decrypts.
#[instrument(skip(local_key, remote_key, challenge_data, id_signature, ephemeral_key), fields(remote = %remote_id))]
pub fn respond(
    local_key: &NodeKey,
    remote_id: &NodeId,
    remote_key: &VerifyingKey,
    challenge_data: &[u8],
    id_signature: &[u8],
    ephemeral_key: &[u8],
) -> Result<DirectionalKeys> {
    let ephemeral = parse_public_key(ephemeral_key).map_err(|_| {
        DiscoveryError::HandshakeVerification(constants::ERR_INVALID_EPHEMERAL_KEY.into())
    })?;
    let local_id = local_key.node_id();
    id_verify(remote_key, challenge_data, ephemeral_key, &local_id, id_signature)?;

    let mut secret = ecdh(local_key.signing_key(), &ephemeral);
    let keys = derive_keys(&secret, remote_id, &local_id, challenge_data);
    secret.zeroize();

    debug!("Recipient derived session keys");
    Ok(keys?.for_recipient())
}
