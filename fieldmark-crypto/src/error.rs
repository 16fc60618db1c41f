//! Error types for the crypto layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Decryption failed (wrong key, truncated envelope, or tampered data).
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Key derivation failed.
    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    /// The machine secret could not be read or provisioned.
    #[error("machine secret error: {0}")]
    SecretStore(String),
}
