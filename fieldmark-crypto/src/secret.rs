//! Machine-secret provisioning.
//!
//! The license store needs key material that is stable for one user on one
//! machine and useless anywhere else. [`SecretStore`] is the seam for
//! OS-native backends (DPAPI, Keychain, libsecret); the shipped
//! [`MachineSecretStore`] mixes the platform machine id with a per-user
//! random secret file created on first use.

use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Length of the per-user random secret file, in bytes.
const USER_SECRET_LEN: usize = 32;

/// Source of per-user, per-machine secret bytes.
///
/// Implementations must return the same bytes for the same user on the same
/// machine across process restarts.
pub trait SecretStore: Send + Sync {
    /// Returns the secret bytes for the current user and machine.
    fn machine_secret(&self) -> CryptoResult<Vec<u8>>;
}

/// Default secret backend: platform machine id + a per-user secret file.
///
/// The secret file holds 32 random bytes generated on first use and stored
/// under the product data directory with user-only permissions. Deleting it
/// invalidates every record sealed with keys derived from it, which degrades
/// to "not activated" at the store layer.
pub struct MachineSecretStore {
    secret_path: PathBuf,
}

impl MachineSecretStore {
    /// Creates a store whose per-user secret file lives in `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            secret_path: data_dir.as_ref().join("machine.secret"),
        }
    }

    /// Reads the per-user secret file, creating it on first use.
    fn load_or_create_user_secret(&self) -> CryptoResult<Vec<u8>> {
        match std::fs::read(&self.secret_path) {
            Ok(bytes) if bytes.len() == USER_SECRET_LEN => return Ok(bytes),
            Ok(bytes) => {
                debug!(
                    path = %self.secret_path.display(),
                    len = bytes.len(),
                    "user secret file has unexpected length, regenerating"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CryptoError::SecretStore(format!(
                    "failed to read {}: {e}",
                    self.secret_path.display()
                )));
            }
        }

        let mut secret = vec![0u8; USER_SECRET_LEN];
        rand::rngs::OsRng.fill_bytes(&mut secret);

        if let Some(parent) = self.secret_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CryptoError::SecretStore(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        write_user_only(&self.secret_path, &secret)?;
        debug!(path = %self.secret_path.display(), "provisioned user secret");
        Ok(secret)
    }
}

impl SecretStore for MachineSecretStore {
    fn machine_secret(&self) -> CryptoResult<Vec<u8>> {
        let user_secret = self.load_or_create_user_secret()?;

        let mut hasher = Sha256::new();
        hasher.update(b"fieldmark-machine-secret-v1");
        hasher.update(&user_secret);
        if let Some(machine_id) = platform_machine_id() {
            hasher.update(machine_id.as_bytes());
        }
        Ok(hasher.finalize().to_vec())
    }
}

/// Writes `bytes` to `path` with user-only permissions where supported.
fn write_user_only(path: &Path, bytes: &[u8]) -> CryptoResult<()> {
    std::fs::write(path, bytes)
        .map_err(|e| CryptoError::SecretStore(format!("failed to write {}: {e}", path.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms).map_err(|e| {
            CryptoError::SecretStore(format!("failed to chmod {}: {e}", path.display()))
        })?;
    }

    Ok(())
}

/// Gets the platform machine id, if one is available.
fn platform_machine_id() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/machine-id")
            .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
            .ok()
            .map(|s| s.trim().to_string())
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.contains("IOPlatformUUID"))
                    .and_then(|l| l.split('"').nth(3))
                    .map(String::from)
            })
    }

    #[cfg(target_os = "windows")]
    {
        // MachineGuid lives in the registry; shelling out to reg.exe avoids a
        // winreg dependency for one value.
        std::process::Command::new("reg")
            .args([
                "query",
                r"HKLM\SOFTWARE\Microsoft\Cryptography",
                "/v",
                "MachineGuid",
            ])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .split_whitespace()
                    .last()
                    .map(|guid| guid.to_string())
            })
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}
