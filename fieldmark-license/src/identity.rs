//! License and machine identity types.
//!
//! Hardware fingerprints are computed outside this subsystem and consumed
//! here as an opaque, ordered string list.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier for a license, as issued by the license authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LicenseId(String);

impl LicenseId {
    /// Creates a license id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LicenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LicenseId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for LicenseId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The identity this installation presents to the license server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineIdentity {
    /// Opaque hardware fingerprints, most significant first.
    pub fingerprints: Vec<String>,
    /// Human-readable machine name shown in session lists.
    pub machine_name: String,
    /// User name shown in session lists, if known.
    pub user_name: Option<String>,
}

impl MachineIdentity {
    /// Creates an identity from host-computed fingerprints, filling in the
    /// machine and user names from the environment.
    pub fn new(fingerprints: Vec<String>) -> Self {
        Self {
            fingerprints,
            machine_name: current_machine_name(),
            user_name: current_user_name(),
        }
    }

    /// Returns the primary (most significant) fingerprint.
    ///
    /// Falls back to an empty string if the host supplied none; the server
    /// rejects such a request, which is the correct outcome.
    pub fn primary_fingerprint(&self) -> &str {
        self.fingerprints.first().map(String::as_str).unwrap_or("")
    }
}

/// Gets the machine hostname.
fn current_machine_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Gets the current user name from the environment.
fn current_user_name() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
}
