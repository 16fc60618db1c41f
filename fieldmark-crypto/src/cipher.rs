//! Record sealing with ChaCha20-Poly1305.
//!
//! State records are small JSON blobs; they are sealed into a single base64
//! envelope of `nonce || ciphertext` so the store can treat ciphertext as an
//! opaque string. The Poly1305 tag makes any on-disk tampering a clean
//! decryption failure rather than garbage plaintext.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

/// Size of nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Seals plaintext into a base64 `nonce || ciphertext` envelope.
///
/// # Errors
///
/// Returns an error if the underlying AEAD encryption fails.
pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<String> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(&envelope))
}

/// Opens a base64 envelope produced by [`seal`], returning the plaintext.
///
/// # Errors
///
/// Returns an error if the envelope is not valid base64, is too short to
/// contain a nonce and tag, or fails authentication (wrong key or tampering).
pub fn open(key: &DerivedKey, envelope: &str) -> CryptoResult<Vec<u8>> {
    let bytes = BASE64
        .decode(envelope.trim())
        .map_err(|e| CryptoError::Decryption(format!("invalid base64: {e}")))?;

    if bytes.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Decryption("envelope too short".to_string()));
    }

    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher.decrypt(nonce, ciphertext).map_err(|_| {
        CryptoError::Decryption("authentication failed (wrong key or tampered data)".to_string())
    })
}
