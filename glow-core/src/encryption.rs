//! Photo payload encryption.
//!
//! Chunked XChaCha20-Poly1305:
//!
//! ```text
//! [24-byte base_nonce][encrypted_chunk_0][encrypted_chunk_1]...
//! ```
//!
//! Each chunk is up to 64 KiB of plaintext plus a 16-byte Poly1305 tag. The
//! chunk nonce is `base_nonce XOR chunk_index` (little-endian) and the
//! associated data marks the final chunk, so truncated or reordered blobs
//! fail authentication.
use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{Aead, OsRng, Payload};
use chacha20poly1305::{AeadCore, KeyInit, XChaCha20Poly1305};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 24;
const TAG_SIZE: usize = 16;
const CHUNK_SIZE: usize = 65536;
const ENCRYPTED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

const AAD_MIDDLE: &[u8] = &[0];
const AAD_LAST: &[u8] = &[1];

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Encryption failed")]
    Encryption,
    #[error("Decryption failed: {0}")]
    Decryption(String),
}

/// Generate a fresh 256-bit key from the OS RNG.
pub fn generate_random_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::fill(&mut key);
    key
}

/// SHA-256 fingerprint of a key: first 8 bytes, hex.
pub fn key_fingerprint(key: &[u8; KEY_SIZE]) -> String {
    let digest = Sha256::digest(key);
    hex::encode(&digest[..8])
}

/// Fingerprint of a hex-encoded key. None if the hex is not a valid key.
pub fn compute_key_fingerprint(key_hex: &str) -> Option<String> {
    parse_key_hex(key_hex).ok().map(|k| key_fingerprint(&k))
}

pub fn parse_key_hex(key_hex: &str) -> Result<[u8; KEY_SIZE], EncryptionError> {
    let bytes = hex::decode(key_hex.trim())
        .map_err(|e| EncryptionError::InvalidKey(format!("not hex: {}", e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        EncryptionError::InvalidKey(format!("expected {} bytes, got {}", KEY_SIZE, b.len()))
    })
}

/// Encrypts and decrypts photo payloads with one user's key.
#[derive(Clone)]
pub struct EncryptionService {
    key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl EncryptionService {
    pub fn new_with_key(key: &[u8; KEY_SIZE]) -> Self {
        Self { key: *key }
    }

    pub fn from_hex(key_hex: &str) -> Result<Self, EncryptionError> {
        Ok(Self::new_with_key(&parse_key_hex(key_hex)?))
    }

    pub fn fingerprint(&self) -> String {
        key_fingerprint(&self.key)
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(GenericArray::from_slice(&self.key))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let cipher = self.cipher();
        let base_nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let mut base = [0u8; NONCE_SIZE];
        base.copy_from_slice(base_nonce.as_slice());

        let total_chunks = plaintext.len().div_ceil(CHUNK_SIZE).max(1);
        let mut output =
            Vec::with_capacity(NONCE_SIZE + plaintext.len() + total_chunks * TAG_SIZE);
        output.extend_from_slice(&base);

        for i in 0..total_chunks {
            let start = i * CHUNK_SIZE;
            let end = (start + CHUNK_SIZE).min(plaintext.len());
            let nonce = chunk_nonce(&base, i as u64);
            let aad = if i == total_chunks - 1 { AAD_LAST } else { AAD_MIDDLE };

            let ct = cipher
                .encrypt(
                    GenericArray::from_slice(&nonce),
                    Payload {
                        msg: &plaintext[start..end],
                        aad,
                    },
                )
                .map_err(|_| EncryptionError::Encryption)?;
            output.extend(ct);
        }

        Ok(output)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(EncryptionError::Decryption(
                "ciphertext too short".to_string(),
            ));
        }

        let mut base = [0u8; NONCE_SIZE];
        base.copy_from_slice(&ciphertext[..NONCE_SIZE]);

        let cipher = self.cipher();
        let data = &ciphertext[NONCE_SIZE..];
        let total_chunks = data.len().div_ceil(ENCRYPTED_CHUNK_SIZE);
        let mut plaintext = Vec::with_capacity(data.len());

        for (i, chunk) in data.chunks(ENCRYPTED_CHUNK_SIZE).enumerate() {
            let nonce = chunk_nonce(&base, i as u64);
            let aad = if i == total_chunks - 1 { AAD_LAST } else { AAD_MIDDLE };

            let decrypted = cipher
                .decrypt(
                    GenericArray::from_slice(&nonce),
                    Payload { msg: chunk, aad },
                )
                .map_err(|_| {
                    EncryptionError::Decryption(format!("authentication failed at chunk {i}"))
                })?;
            plaintext.extend(decrypted);
        }

        Ok(plaintext)
    }
}

/// Derive chunk nonce: base_nonce XOR chunk_index (little-endian).
fn chunk_nonce(base_nonce: &[u8; NONCE_SIZE], chunk_index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base_nonce;
    for (n, b) in nonce.iter_mut().zip(chunk_index.to_le_bytes()) {
        *n ^= b;
    }
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> EncryptionService {
        EncryptionService::new_with_key(&[0x42u8; KEY_SIZE])
    }

    #[test]
    fn round_trip_small() {
        let enc = service();
        let ct = enc.encrypt(b"hello world").unwrap();
        assert_eq!(enc.decrypt(&ct).unwrap(), b"hello world");
    }

    #[test]
    fn round_trip_empty() {
        let enc = service();
        let ct = enc.encrypt(b"").unwrap();
        assert_eq!(ct.len(), NONCE_SIZE + TAG_SIZE);
        assert!(enc.decrypt(&ct).unwrap().is_empty());
    }

    #[test]
    fn round_trip_across_chunk_boundaries() {
        let enc = EncryptionService::new_with_key(&generate_random_key());
        for len in [CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, CHUNK_SIZE * 2 + 17] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let ct = enc.encrypt(&plaintext).unwrap();
            assert_eq!(enc.decrypt(&ct).unwrap(), plaintext, "len {}", len);
        }
    }

    #[test]
    fn ciphertext_is_not_plaintext() {
        let enc = service();
        let plaintext = vec![0xAB; 1024];
        let ct = enc.encrypt(&plaintext).unwrap();
        assert!(!ct.windows(64).any(|w| w == &plaintext[..64]));
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let enc = service();
        assert_ne!(enc.encrypt(b"jpeg").unwrap(), enc.encrypt(b"jpeg").unwrap());
    }

    #[test]
    fn wrong_key_fails() {
        let ct = service().encrypt(b"secret face").unwrap();
        let other = EncryptionService::new_with_key(&[0x07u8; KEY_SIZE]);
        assert!(matches!(
            other.decrypt(&ct),
            Err(EncryptionError::Decryption(_))
        ));
    }

    #[test]
    fn tampered_byte_fails() {
        let enc = service();
        let mut ct = enc.encrypt(b"secret face").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(enc.decrypt(&ct).is_err());
    }

    #[test]
    fn truncation_at_chunk_boundary_fails() {
        let enc = service();
        let plaintext = vec![1u8; CHUNK_SIZE * 2];
        let ct = enc.encrypt(&plaintext).unwrap();
        let truncated = &ct[..NONCE_SIZE + ENCRYPTED_CHUNK_SIZE];
        assert!(enc.decrypt(truncated).is_err());
    }

    #[test]
    fn too_short_fails() {
        assert!(service().decrypt(&[0u8; 10]).is_err());
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = service().fingerprint();
        assert_eq!(a, service().fingerprint());
        assert_eq!(a.len(), 16);
        assert_eq!(compute_key_fingerprint(&hex::encode([0x42u8; 32])), Some(a));
        assert_eq!(compute_key_fingerprint("zz"), None);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(EncryptionService::from_hex("abcd").is_err());
        assert!(EncryptionService::from_hex(&hex::encode([1u8; 32])).is_ok());
    }
}
