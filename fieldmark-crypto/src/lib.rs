//! Encryption and machine-secret layer for Fieldmark.
//!
//! This crate owns everything cryptographic that the license runtime needs:
//! - ChaCha20-Poly1305 sealing of small state records (base64 envelopes)
//! - Argon2id derivation of record keys from the machine secret
//! - Provisioning of a stable per-user machine secret
//!
//! Consumers never see raw key bytes outside of [`DerivedKey`], which
//! zeroizes on drop.

mod cipher;
mod error;
mod key;
mod secret;

pub use cipher::{open, seal, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_record_key, DerivedKey, KdfParams, KEY_SIZE};
pub use secret::{MachineSecretStore, SecretStore};
