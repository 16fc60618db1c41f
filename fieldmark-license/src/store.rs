//! Encrypted local state store.
//!
//! One small encrypted record per (license id, record kind), written to a
//! primary file and mirrored to a secondary directory so deleting one copy
//! does not reset the installation. The plaintext is a versioned JSON
//! envelope; the ciphertext layout (base64 nonce‖ciphertext) is owned by
//! `fieldmark-crypto`.
//!
//! Loading is infallible by design: any missing file, failed decryption, or
//! unparseable plaintext degrades to the record type's `Default` — locally
//! corrupted state means "not activated", never a crash in the host.

use crate::config::StoreConfig;
use crate::error::{LicenseError, LicenseResult};
use crate::identity::LicenseId;
use fieldmark_crypto::{
    derive_record_key, open, seal, DerivedKey, KdfParams, MachineSecretStore, SecretStore,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Plaintext schema version. Bump when a record's shape changes
/// incompatibly; old versions load as default.
const RECORD_VERSION: u32 = 1;

/// Kinds of persisted records, one file per kind per license.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Grace-period bookkeeping.
    Grace,
    /// Cached seat usage for degraded status queries.
    Usage,
    /// Last-seen-time ratchet for clock-rollback detection.
    Clock,
}

impl RecordKind {
    fn suffix(&self) -> &'static str {
        match self {
            Self::Grace => "grace",
            Self::Usage => "usage",
            Self::Clock => "clock",
        }
    }
}

/// Versioned plaintext envelope.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord<T> {
    version: u32,
    payload: T,
}

/// Encrypts, persists, and mirrors per-license state records.
pub struct SecureStateStore {
    key: DerivedKey,
    data_dir: PathBuf,
    mirror_dir: Option<PathBuf>,
}

impl SecureStateStore {
    /// Opens the store, provisioning the machine secret if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the machine secret cannot be read or provisioned,
    /// or key derivation fails. Record-level corruption is not an error here.
    pub fn open(config: &StoreConfig) -> LicenseResult<Self> {
        let secrets = MachineSecretStore::new(&config.data_dir);
        Self::open_with_secret(config, &secrets, &KdfParams::default())
    }

    /// Opens the store against an explicit secret backend and KDF parameters.
    pub fn open_with_secret(
        config: &StoreConfig,
        secrets: &dyn SecretStore,
        kdf: &KdfParams,
    ) -> LicenseResult<Self> {
        config.validate()?;
        let machine_secret = secrets.machine_secret()?;
        let key = derive_record_key(&machine_secret, &config.entropy, kdf)?;
        Ok(Self {
            key,
            data_dir: config.data_dir.clone(),
            mirror_dir: config.mirror_dir.clone(),
        })
    }

    /// Loads a record, degrading to `T::default()` on any failure.
    ///
    /// Tries the primary file first, then the mirror. A record that fails to
    /// decrypt or parse is logged and treated as absent.
    pub fn load<T>(&self, license_id: &LicenseId, kind: RecordKind) -> T
    where
        T: DeserializeOwned + Default,
    {
        let primary = self.record_path(&self.data_dir, license_id, kind);
        match self.try_load(&primary) {
            Ok(Some(value)) => return value,
            Ok(None) => {}
            Err(e) => {
                warn!(path = %primary.display(), error = %e, "primary record unreadable");
            }
        }

        if let Some(mirror_dir) = &self.mirror_dir {
            let mirror = self.record_path(mirror_dir, license_id, kind);
            match self.try_load(&mirror) {
                Ok(Some(value)) => {
                    debug!(path = %mirror.display(), "recovered record from mirror");
                    return value;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %mirror.display(), error = %e, "mirror record unreadable");
                }
            }
        }

        T::default()
    }

    /// Saves a record to the primary file and best-effort mirrors it.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing fails or the primary write fails. A
    /// failed mirror write is logged and swallowed.
    pub fn save<T: Serialize>(
        &self,
        license_id: &LicenseId,
        kind: RecordKind,
        value: &T,
    ) -> LicenseResult<()> {
        let envelope = StoredRecord {
            version: RECORD_VERSION,
            payload: value,
        };
        let plaintext = serde_json::to_vec(&envelope)?;
        let sealed = seal(&self.key, &plaintext)?;

        let primary = self.record_path(&self.data_dir, license_id, kind);
        write_record(&primary, &sealed)?;

        if let Some(mirror_dir) = &self.mirror_dir {
            let mirror = self.record_path(mirror_dir, license_id, kind);
            if let Err(e) = write_record(&mirror, &sealed) {
                warn!(path = %mirror.display(), error = %e, "mirror write failed");
            }
        }

        Ok(())
    }

    /// Removes a record from the primary store and the mirror.
    pub fn clear(&self, license_id: &LicenseId, kind: RecordKind) {
        let primary = self.record_path(&self.data_dir, license_id, kind);
        remove_quiet(&primary);
        if let Some(mirror_dir) = &self.mirror_dir {
            remove_quiet(&self.record_path(mirror_dir, license_id, kind));
        }
    }

    fn try_load<T: DeserializeOwned>(&self, path: &Path) -> LicenseResult<Option<T>> {
        let sealed = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LicenseError::Storage(e.to_string())),
        };

        let plaintext = open(&self.key, &sealed)?;
        let envelope: StoredRecord<T> = serde_json::from_slice(&plaintext)?;
        if envelope.version != RECORD_VERSION {
            debug!(
                path = %path.display(),
                version = envelope.version,
                "record schema version mismatch, treating as absent"
            );
            return Ok(None);
        }
        Ok(Some(envelope.payload))
    }

    fn record_path(&self, dir: &Path, license_id: &LicenseId, kind: RecordKind) -> PathBuf {
        dir.join(format!(
            "{}.{}.rec",
            sanitize_id(license_id.as_str()),
            kind.suffix()
        ))
    }
}

/// Restricts license ids to filesystem-safe characters for file naming.
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn write_record(path: &Path, sealed: &str) -> LicenseResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LicenseError::Storage(e.to_string()))?;
    }
    std::fs::write(path, sealed).map_err(|e| LicenseError::Storage(e.to_string()))
}

fn remove_quiet(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove record");
        }
    }
}
