//! Symmetric primitives used by the packet codec.
//!
//! - Header masking: AES-128-CTR keyed by the first 16 bytes of the destination id
//! - Message sealing: ChaCha20-Poly1305 with the unmasked header as associated data
//! - Randomness for IVs, nonces, tokens and decoy payloads

use crate::core::packet::{IV_SIZE, NONCE_SIZE};
use crate::error::{constants, DiscoveryError, Result};
use aes::Aes128;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;

/// AEAD key length in bytes
pub const KEY_SIZE: usize = 32;

/// Poly1305 authentication tag length in bytes
pub const TAG_SIZE: usize = 16;

/// Header masking key length in bytes
pub const MASKING_KEY_SIZE: usize = 16;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Stateful header masking stream.
///
/// The header is demasked in two steps (static header first, then auth-data whose
/// length the static header declares), so the keystream position must carry over.
pub struct HeaderMask {
    cipher: Aes128Ctr,
}

impl HeaderMask {
    pub fn new(masking_key: &[u8; MASKING_KEY_SIZE], iv: &[u8; IV_SIZE]) -> Self {
        Self {
            cipher: Aes128Ctr::new(masking_key.into(), iv.into()),
        }
    }

    /// XOR the next keystream bytes into `data`. Masking and demasking are the same call.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
    }
}

/// Mask or demask `data` in one pass.
pub fn mask(masking_key: &[u8; MASKING_KEY_SIZE], iv: &[u8; IV_SIZE], data: &mut [u8]) {
    HeaderMask::new(masking_key, iv).apply(data);
}

/// Seal a message plaintext. The output carries the 16-byte tag at the end.
pub fn encrypt_message(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| DiscoveryError::EncryptionFailure)
}

/// Open a sealed message. Wrong key, wrong nonce, tampered AAD or ciphertext all
/// surface as `DecryptionFailure`; no partial plaintext is ever returned.
pub fn decrypt_message(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(DiscoveryError::DecryptionFailure);
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| DiscoveryError::DecryptionFailure)
}

/// Fill a fixed-size array from the thread-local CSPRNG.
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::rng().fill_bytes(&mut out);
    out
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    rand::rng().fill_bytes(&mut out);
    out
}

/// Fill a buffer straight from the operating system, for long-lived key material.
pub fn os_random(buf: &mut [u8]) -> Result<()> {
    getrandom::fill(buf).map_err(|_| DiscoveryError::Custom(constants::ERR_RANDOM_SOURCE.into()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_is_self_inverse() {
        let key = [7u8; MASKING_KEY_SIZE];
        let iv = [9u8; IV_SIZE];
        let original = b"static header and auth data".to_vec();

        let mut data = original.clone();
        mask(&key, &iv, &mut data);
        assert_ne!(data, original);
        mask(&key, &iv, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_split_masking_matches_single_pass() {
        let key = [1u8; MASKING_KEY_SIZE];
        let iv = [2u8; IV_SIZE];
        let mut whole = vec![0x55u8; 57];
        mask(&key, &iv, &mut whole);

        let mut split = vec![0x55u8; 57];
        let mut stream = HeaderMask::new(&key, &iv);
        let (head, tail) = split.split_at_mut(23);
        stream.apply(head);
        stream.apply(tail);
        assert_eq!(whole, split);
    }

    #[test]
    fn test_aead_round_trip_and_aad_binding() {
        let key = [3u8; KEY_SIZE];
        let nonce = [4u8; NONCE_SIZE];
        let sealed = encrypt_message(&key, &nonce, b"ping", b"header").unwrap();
        assert_eq!(sealed.len(), 4 + TAG_SIZE);
        assert_eq!(
            decrypt_message(&key, &nonce, &sealed, b"header").unwrap(),
            b"ping"
        );
        assert!(matches!(
            decrypt_message(&key, &nonce, &sealed, b"headex"),
            Err(DiscoveryError::DecryptionFailure)
        ));
    }

    #[test]
    fn test_short_ciphertext_is_decrypt_failure() {
        let result = decrypt_message(&[0u8; KEY_SIZE], &[0u8; NONCE_SIZE], &[1, 2, 3], &[]);
        assert!(matches!(result, Err(DiscoveryError::DecryptionFailure)));
    }

    #[test]
    fn test_random_arrays_differ() {
        let a: [u8; 16] = random_array();
        let b: [u8; 16] = random_array();
        assert_ne!(a, b);
    }
}
