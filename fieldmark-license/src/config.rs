//! Runtime configuration.
//!
//! Everything tunable is injected here rather than compiled in. Defaults
//! match the deployed product; [`RuntimeConfig::validate`] must pass before
//! any component is constructed from the config.

use crate::error::{LicenseError, LicenseResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// License server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the license server (e.g. `https://license.fieldmark.app`).
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://license.fieldmark.app".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Seat leasing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatLeaseConfig {
    /// Interval between heartbeats for a held seat.
    pub heartbeat_interval_secs: u64,
    /// Server-side session timeout the deployment is configured with.
    /// The heartbeat interval MUST be strictly less than this.
    pub session_timeout_minutes: u64,
}

impl Default for SeatLeaseConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 60,
            session_timeout_minutes: 5,
        }
    }
}

impl SeatLeaseConfig {
    /// Validates the protocol precondition `heartbeat < session timeout`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the heartbeat interval is zero or not
    /// strictly less than the session timeout.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.heartbeat_interval_secs == 0 {
            return Err(LicenseError::InvalidConfig(
                "heartbeat_interval_secs must be non-zero".to_string(),
            ));
        }
        let timeout_secs = self.session_timeout_minutes * 60;
        if self.heartbeat_interval_secs >= timeout_secs {
            return Err(LicenseError::InvalidConfig(format!(
                "heartbeat interval ({}s) must be strictly less than the session \
                 timeout ({timeout_secs}s)",
                self.heartbeat_interval_secs
            )));
        }
        Ok(())
    }
}

/// Grace period settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraceConfig {
    /// Length of the grace window in days.
    pub grace_period_days: u32,
    /// Warning thresholds in days remaining, strictly descending.
    pub warning_thresholds: Vec<u32>,
    /// Tolerated backward clock drift before tampering is reported.
    pub rollback_tolerance_secs: u64,
}

impl Default for GraceConfig {
    fn default() -> Self {
        Self {
            grace_period_days: 14,
            warning_thresholds: crate::grace::DEFAULT_WARNING_THRESHOLDS.to_vec(),
            rollback_tolerance_secs: crate::clock::DEFAULT_ROLLBACK_TOLERANCE_SECS,
        }
    }
}

impl GraceConfig {
    /// Validates that thresholds are non-empty and strictly descending.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.warning_thresholds.is_empty() {
            return Err(LicenseError::InvalidConfig(
                "warning_thresholds must not be empty".to_string(),
            ));
        }
        if !self.warning_thresholds.windows(2).all(|w| w[0] > w[1]) {
            return Err(LicenseError::InvalidConfig(format!(
                "warning_thresholds must be strictly descending, got {:?}",
                self.warning_thresholds
            )));
        }
        Ok(())
    }
}

/// Transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Validity window requested for generated transfer tokens.
    pub token_validity_hours: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            token_validity_hours: 24,
        }
    }
}

/// Secure state store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Primary directory for encrypted records (and the machine secret).
    pub data_dir: PathBuf,
    /// Secondary directory mirrored on every write, for resilience against
    /// deletion of the primary. `None` disables mirroring.
    pub mirror_dir: Option<PathBuf>,
    /// Application entropy mixed into key derivation. Injected, not a
    /// compiled-in constant; at least 8 bytes.
    pub entropy: Vec<u8>,
}

impl StoreConfig {
    /// Default store locations under the user's data directory.
    pub fn for_product() -> Self {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            data_dir: base.join("Fieldmark").join("license"),
            mirror_dir: dirs::config_dir().map(|d| d.join("Fieldmark").join("license-mirror")),
            entropy: b"fieldmark-license-state-v1".to_vec(),
        }
    }

    /// Validates entropy length.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.entropy.len() < 8 {
            return Err(LicenseError::InvalidConfig(
                "store entropy must be at least 8 bytes".to_string(),
            ));
        }
        Ok(())
    }
}

/// Aggregated runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub server: ServerConfig,
    pub seats: SeatLeaseConfig,
    pub grace: GraceConfig,
    pub transfer: TransferConfig,
    pub store: StoreConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            seats: SeatLeaseConfig::default(),
            grace: GraceConfig::default(),
            transfer: TransferConfig::default(),
            store: StoreConfig::for_product(),
        }
    }
}

impl RuntimeConfig {
    /// Validates every section.
    pub fn validate(&self) -> LicenseResult<()> {
        self.seats.validate()?;
        self.grace.validate()?;
        self.store.validate()?;
        Ok(())
    }
}
