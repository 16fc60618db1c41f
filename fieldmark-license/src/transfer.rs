//! License transfer between machines.
//!
//! A transfer moves a license's active seat from a source machine to a
//! target machine through a single-use, time-boxed token. The server
//! enforces single use and the per-license transfer count; this coordinator
//! only observes rejections. Every named transfer rejection is terminal —
//! the user must take a different action — and only a network fault is worth
//! retrying.

use crate::config::TransferConfig;
use crate::error::{LicenseError, LicenseResult};
use crate::events::{EventBus, LicenseEvent};
use crate::identity::{LicenseId, MachineIdentity};
use crate::server::{
    CancelTransferRequest, CompleteTransferRequest, GenerateTransferRequest,
    LicenseServerClient, ValidateTransferRequest,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// A transfer token as observed by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferToken {
    /// Opaque, unguessable token string. Treat as a credential.
    pub token: String,
    pub license_id: String,
    pub expires_at: DateTime<Utc>,
    /// Which transfer this is for the license (1-based).
    pub transfer_number: u32,
    pub remaining_transfers: u32,
}

/// Result of a completed inbound transfer.
#[derive(Debug, Clone)]
pub struct CompletedTransfer {
    pub license_id: String,
    /// Fresh license blob to install locally.
    pub new_license_data: String,
    pub transferred_at: DateTime<Utc>,
}

/// Drives the transfer-token protocol.
pub struct TransferCoordinator {
    server: Arc<LicenseServerClient>,
    events: EventBus,
    config: TransferConfig,
    license_id: LicenseId,
    identity: MachineIdentity,
}

impl TransferCoordinator {
    /// Creates a transfer coordinator for this machine.
    pub fn new(
        server: Arc<LicenseServerClient>,
        events: EventBus,
        config: TransferConfig,
        license_id: LicenseId,
        identity: MachineIdentity,
    ) -> Self {
        Self {
            server,
            events,
            config,
            license_id,
            identity,
        }
    }

    /// Generates a transfer token binding this machine as the source.
    ///
    /// Fires `TransferInitiated` on success.
    ///
    /// # Errors
    ///
    /// `TransferLimitReached`, `Revoked`, and `Expired` are terminal;
    /// `Network`/`Server` may be retried by the caller.
    pub async fn generate_token(&self) -> LicenseResult<TransferToken> {
        let request = GenerateTransferRequest {
            license_id: self.license_id.to_string(),
            source_fingerprints: self.identity.fingerprints.clone(),
            source_machine_name: self.identity.machine_name.clone(),
            validity_hours: self.config.token_validity_hours,
        };
        let response = self.server.generate_transfer(&request).await?;

        info!(
            license_id = %self.license_id,
            transfer_number = response.transfer_number,
            remaining = response.remaining_transfers,
            expires_at = %response.expires_at,
            "transfer token generated"
        );
        self.events.emit(LicenseEvent::TransferInitiated {
            license_id: self.license_id.to_string(),
            expires_at: response.expires_at,
            remaining_transfers: response.remaining_transfers,
        });

        Ok(TransferToken {
            token: response.token,
            license_id: self.license_id.to_string(),
            expires_at: response.expires_at,
            transfer_number: response.transfer_number,
            remaining_transfers: response.remaining_transfers,
        })
    }

    /// Side-effect-free pre-flight check of a token.
    ///
    /// Returns `false` for consumed, expired, cancelled, or unknown tokens,
    /// and for any failure to reach a verdict — a UI uses this to decide
    /// whether to prompt the user, nothing more.
    pub async fn validate_token(&self, token: &str) -> bool {
        let request = ValidateTransferRequest {
            token: token.to_string(),
        };
        match self.server.validate_transfer(&request).await {
            Ok(response) => response.is_valid,
            Err(e) => {
                debug!(error = %e, "token validation did not reach a verdict");
                false
            }
        }
    }

    /// Completes a transfer onto this machine.
    ///
    /// On success the token is permanently consumed server-side and the
    /// returned license blob must be installed locally. Fires
    /// `TransferCompleted`.
    ///
    /// # Errors
    ///
    /// `TokenExpired`, `TokenUsed`, `TransferLimitReached`,
    /// `HardwareMismatch`, `SameMachine`, `Revoked`, and `Expired` are
    /// terminal; only `Network`/`Server` faults are retryable.
    pub async fn complete_transfer(&self, token: &str) -> LicenseResult<CompletedTransfer> {
        let request = CompleteTransferRequest {
            token: token.to_string(),
            target_fingerprints: self.identity.fingerprints.clone(),
            target_machine_name: self.identity.machine_name.clone(),
            target_user_name: self.identity.user_name.clone(),
        };
        let response = self.server.complete_transfer(&request).await?;

        info!(
            license_id = %response.license_id,
            transferred_at = %response.transferred_at,
            "license transfer completed"
        );
        self.events.emit(LicenseEvent::TransferCompleted {
            license_id: response.license_id.clone(),
            transferred_at: response.transferred_at,
        });

        Ok(CompletedTransfer {
            license_id: response.license_id,
            new_license_data: response.new_license_data,
            transferred_at: response.transferred_at,
        })
    }

    /// Invalidates a still-pending token before it is consumed.
    pub async fn cancel_token(&self, token: &str) -> LicenseResult<()> {
        let request = CancelTransferRequest {
            token: token.to_string(),
        };
        self.server.cancel_transfer(&request).await?;
        info!(license_id = %self.license_id, "transfer token cancelled");
        Ok(())
    }

    /// Classifies a transfer failure for callers deciding whether to retry.
    pub fn is_terminal(error: &LicenseError) -> bool {
        !error.can_retry()
    }
}
