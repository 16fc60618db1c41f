//! Record-key derivation.
//!
//! Uses Argon2id to derive encryption keys from the machine secret plus
//! caller-supplied entropy. The entropy is injected configuration, not a
//! compiled-in constant, so two products (or two installs configured
//! differently) derive unrelated keys from the same machine secret.

use crate::error::{CryptoError, CryptoResult};
use argon2::{Argon2, Params, Version};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of encryption keys in bytes (256 bits for ChaCha20).
pub const KEY_SIZE: usize = 32;

/// Minimum entropy length accepted for derivation (Argon2 salt minimum).
const MIN_ENTROPY_LEN: usize = 8;

/// A derived encryption key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Creates a derived key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Key derivation parameters.
#[derive(Clone, Debug)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Time cost (iterations).
    pub time_cost: u32,
    /// Parallelism factor.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP recommendations for Argon2id (2023); derivation runs once per
        // store open, so sub-second cost is acceptable.
        Self {
            memory_cost: 19 * 1024, // 19 MiB
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Fast parameters for tests (insecure).
    pub fn fast_insecure() -> Self {
        Self {
            memory_cost: 1024, // 1 MiB
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// Derives a record-encryption key from the machine secret and entropy.
///
/// The machine secret is the password input; the entropy acts as the salt.
///
/// # Errors
///
/// Returns an error if the entropy is shorter than 8 bytes or the Argon2
/// parameters are rejected.
pub fn derive_record_key(
    machine_secret: &[u8],
    entropy: &[u8],
    params: &KdfParams,
) -> CryptoResult<DerivedKey> {
    if entropy.len() < MIN_ENTROPY_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "entropy too short: {} bytes (minimum {MIN_ENTROPY_LEN})",
            entropy.len()
        )));
    }

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(machine_secret, entropy, &mut key_bytes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    Ok(DerivedKey::from_bytes(key_bytes))
}
