//! Error taxonomy for the license runtime.
//!
//! [`LicenseError`] is what operations return; [`ErrorCode`] is the stable
//! wire/taxonomy identifier; [`LicenseErrorInfo`] is the user-facing record
//! the host renders. The code → info mapping is a pure, total function:
//! message wording may evolve, but codes, severities, and retryability are a
//! behavioral contract.

use chrono::{DateTime, Utc};
use fieldmark_crypto::CryptoError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;

/// Errors that can occur in license runtime operations.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// License hard-expired (past any grace window).
    #[error("license expired on {0}")]
    Expired(String),

    /// License has been revoked by the authority.
    #[error("license has been revoked")]
    Revoked,

    /// License unknown to the server.
    #[error("license not found: {0}")]
    NotFound(String),

    /// License signature did not verify.
    #[error("license signature invalid")]
    InvalidSignature,

    /// Local license state unreadable or inconsistent.
    #[error("license data corrupted: {0}")]
    Corrupted(String),

    /// License is bound to different hardware.
    #[error("hardware fingerprint mismatch")]
    HardwareMismatch,

    /// All seats are in use. Carries the server's description of the
    /// occupancy, since the error body has no structured counts.
    #[error("seat limit exceeded: {0}")]
    SeatLimitExceeded(String),

    /// The license has no transfers remaining.
    #[error("transfer limit reached")]
    TransferLimitReached,

    /// The transfer token's validity window has passed.
    #[error("transfer token expired")]
    TokenExpired,

    /// The transfer token was already consumed.
    #[error("transfer token already used")]
    TokenUsed,

    /// Transfer target is the machine the token was generated on.
    #[error("cannot transfer a license to the same machine")]
    SameMachine,

    /// Network-level failure (no usable server response).
    #[error("network error: {0}")]
    Network(String),

    /// Server responded with an unexpected status.
    #[error("server error (status {status}): {message}")]
    Server { status: u16, message: String },

    /// Offline longer than the license permits.
    #[error("offline period exceeded")]
    OfflinePeriodExceeded,

    /// System clock rolled back past the persisted high-water mark.
    #[error("clock tampering detected: now {observed}, last seen {last_seen}")]
    ClockTampering {
        observed: DateTime<Utc>,
        last_seen: DateTime<Utc>,
    },

    /// Invalid runtime configuration (programming/deployment error).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local persistence failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Crypto layer failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl LicenseError {
    /// Returns the taxonomy code for this error, if it has one.
    ///
    /// `InvalidConfig` is a deployment error with no user-facing taxonomy
    /// entry and returns `None`. Local storage/serialization/crypto failures
    /// fold into `LicenseCorrupted`.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Expired(_) => Some(ErrorCode::LicenseExpired),
            Self::Revoked => Some(ErrorCode::LicenseRevoked),
            Self::NotFound(_) => Some(ErrorCode::LicenseNotFound),
            Self::InvalidSignature => Some(ErrorCode::InvalidSignature),
            Self::Corrupted(_) | Self::Storage(_) | Self::Serialization(_) | Self::Crypto(_) => {
                Some(ErrorCode::LicenseCorrupted)
            }
            Self::HardwareMismatch => Some(ErrorCode::HardwareMismatch),
            Self::SeatLimitExceeded(_) => Some(ErrorCode::SeatLimitExceeded),
            Self::TransferLimitReached => Some(ErrorCode::TransferLimitReached),
            Self::TokenExpired => Some(ErrorCode::TokenExpired),
            Self::TokenUsed => Some(ErrorCode::TokenUsed),
            Self::SameMachine => Some(ErrorCode::SameMachine),
            Self::Network(_) => Some(ErrorCode::NetworkError),
            Self::Server { .. } => Some(ErrorCode::ServerError),
            Self::OfflinePeriodExceeded => Some(ErrorCode::OfflinePeriodExceeded),
            Self::ClockTampering { .. } => Some(ErrorCode::ClockTamperingDetected),
            Self::InvalidConfig(_) => None,
        }
    }

    /// Builds the user-facing info record for this error, if it has a
    /// taxonomy code.
    pub fn info(&self) -> Option<LicenseErrorInfo> {
        self.code().map(LicenseErrorInfo::for_code)
    }

    /// Returns true if the caller may retry the failed operation.
    pub fn can_retry(&self) -> bool {
        self.code().is_some_and(|c| c.is_retryable())
    }
}

/// Stable taxonomy codes, as exchanged with the license server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    LicenseExpired,
    GracePeriod,
    LicenseRevoked,
    LicenseNotFound,
    InvalidSignature,
    LicenseCorrupted,
    HardwareMismatch,
    SeatLimitExceeded,
    TransferLimitReached,
    TokenExpired,
    TokenUsed,
    SameMachine,
    NetworkError,
    ServerError,
    OfflinePeriodExceeded,
    ClockTamperingDetected,
}

impl ErrorCode {
    /// Returns true if operations failing with this code may be retried.
    ///
    /// Only the transient environment pair is retryable; every
    /// license-lifecycle, hardware, and capacity code is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError | Self::ServerError)
    }

    /// Returns the wire form of this code (e.g. `TOKEN_EXPIRED`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LicenseExpired => "LICENSE_EXPIRED",
            Self::GracePeriod => "GRACE_PERIOD",
            Self::LicenseRevoked => "LICENSE_REVOKED",
            Self::LicenseNotFound => "LICENSE_NOT_FOUND",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::LicenseCorrupted => "LICENSE_CORRUPTED",
            Self::HardwareMismatch => "HARDWARE_MISMATCH",
            Self::SeatLimitExceeded => "SEAT_LIMIT_EXCEEDED",
            Self::TransferLimitReached => "TRANSFER_LIMIT_REACHED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenUsed => "TOKEN_USED",
            Self::SameMachine => "SAME_MACHINE",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ServerError => "SERVER_ERROR",
            Self::OfflinePeriodExceeded => "OFFLINE_PERIOD_EXCEEDED",
            Self::ClockTamperingDetected => "CLOCK_TAMPERING_DETECTED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LICENSE_EXPIRED" => Ok(Self::LicenseExpired),
            "GRACE_PERIOD" => Ok(Self::GracePeriod),
            "LICENSE_REVOKED" => Ok(Self::LicenseRevoked),
            "LICENSE_NOT_FOUND" => Ok(Self::LicenseNotFound),
            "INVALID_SIGNATURE" => Ok(Self::InvalidSignature),
            "LICENSE_CORRUPTED" => Ok(Self::LicenseCorrupted),
            "HARDWARE_MISMATCH" => Ok(Self::HardwareMismatch),
            "SEAT_LIMIT_EXCEEDED" => Ok(Self::SeatLimitExceeded),
            "TRANSFER_LIMIT_REACHED" => Ok(Self::TransferLimitReached),
            "TOKEN_EXPIRED" => Ok(Self::TokenExpired),
            "TOKEN_USED" => Ok(Self::TokenUsed),
            "SAME_MACHINE" => Ok(Self::SameMachine),
            "NETWORK_ERROR" => Ok(Self::NetworkError),
            "SERVER_ERROR" => Ok(Self::ServerError),
            "OFFLINE_PERIOD_EXCEEDED" => Ok(Self::OfflinePeriodExceeded),
            "CLOCK_TAMPERING_DETECTED" => Ok(Self::ClockTamperingDetected),
            _ => Err(()),
        }
    }
}

/// Severity of a user-facing error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Degraded but working; informational banner territory.
    Warning,
    /// The requested operation failed; user action needed.
    Error,
    /// The installation cannot continue operating normally.
    Critical,
}

/// User-facing description of a license failure.
///
/// Immutable, constructed per failure, never persisted. The host renders
/// these; it must not re-derive severity or retryability from the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseErrorInfo {
    pub code: ErrorCode,
    pub title: String,
    pub short_message: String,
    pub detailed_message: String,
    pub recommended_actions: Vec<String>,
    pub severity: ErrorSeverity,
    pub can_retry: bool,
    /// Correlation id for support tickets, unique per constructed info.
    pub support_context: String,
}

impl LicenseErrorInfo {
    /// Maps a taxonomy code to its user-facing info record.
    ///
    /// Pure and total over [`ErrorCode`]; a fresh support correlation id is
    /// generated per call.
    pub fn for_code(code: ErrorCode) -> Self {
        let (title, short, detail, actions, severity) = match code {
            ErrorCode::LicenseExpired => (
                "License expired",
                "Your license has expired.",
                "The license's hard expiration date and any grace period have passed. \
                 Functionality is restricted until the license is renewed.",
                vec!["Renew your license", "Contact your administrator"],
                ErrorSeverity::Critical,
            ),
            ErrorCode::GracePeriod => (
                "License in grace period",
                "Your license has expired and is running on borrowed time.",
                "The license continues to work during the grace period. Renew before \
                 the grace period ends to avoid interruption.",
                vec!["Renew your license"],
                ErrorSeverity::Warning,
            ),
            ErrorCode::LicenseRevoked => (
                "License revoked",
                "This license has been revoked.",
                "The license authority has revoked this license. It can no longer be \
                 used on any machine.",
                vec!["Contact support"],
                ErrorSeverity::Critical,
            ),
            ErrorCode::LicenseNotFound => (
                "License not found",
                "No license is registered for this installation.",
                "The license server does not recognize this license id. It may have \
                 been entered incorrectly or removed from your account.",
                vec!["Re-enter your license key", "Contact support"],
                ErrorSeverity::Error,
            ),
            ErrorCode::InvalidSignature => (
                "Invalid license",
                "The license data failed verification.",
                "The license's cryptographic signature does not verify. The license \
                 file may have been modified.",
                vec!["Re-install your license", "Contact support"],
                ErrorSeverity::Critical,
            ),
            ErrorCode::LicenseCorrupted => (
                "License data corrupted",
                "Local license data could not be read.",
                "The locally stored license state is unreadable and has been treated \
                 as not activated. Re-activating restores it.",
                vec!["Re-activate this installation"],
                ErrorSeverity::Error,
            ),
            ErrorCode::HardwareMismatch => (
                "Hardware mismatch",
                "This license is bound to different hardware.",
                "The machine's hardware fingerprint does not match the one the \
                 license is bound to. Use a license transfer to move it here.",
                vec!["Transfer the license to this machine", "Contact support"],
                ErrorSeverity::Error,
            ),
            ErrorCode::SeatLimitExceeded => (
                "All seats in use",
                "Every seat on this license is currently in use.",
                "The license's concurrent-seat limit has been reached. A seat frees \
                 up when another user exits or their session times out.",
                vec![
                    "Wait for a seat to free up",
                    "Ask another user to exit",
                    "Purchase additional seats",
                ],
                ErrorSeverity::Warning,
            ),
            ErrorCode::TransferLimitReached => (
                "Transfer limit reached",
                "This license has no transfers remaining.",
                "The license has been transferred the maximum number of times \
                 permitted.",
                vec!["Contact support to reset transfers"],
                ErrorSeverity::Error,
            ),
            ErrorCode::TokenExpired => (
                "Transfer token expired",
                "The transfer token is no longer valid.",
                "The token's validity window has passed. Generate a new token on the \
                 source machine.",
                vec!["Generate a new transfer token"],
                ErrorSeverity::Warning,
            ),
            ErrorCode::TokenUsed => (
                "Transfer token already used",
                "This transfer token has already been used.",
                "Transfer tokens are single-use. If the previous transfer did not \
                 land where you expected, contact support.",
                vec!["Generate a new transfer token", "Contact support"],
                ErrorSeverity::Error,
            ),
            ErrorCode::SameMachine => (
                "Same machine",
                "The license is already active on this machine.",
                "A transfer cannot target the machine the token was generated on.",
                vec!["Complete the transfer on the new machine"],
                ErrorSeverity::Warning,
            ),
            ErrorCode::NetworkError => (
                "Network error",
                "The license server could not be reached.",
                "The request did not get a usable response from the license server. \
                 Your license state is unchanged.",
                vec!["Check your network connection", "Try again"],
                ErrorSeverity::Warning,
            ),
            ErrorCode::ServerError => (
                "Server error",
                "The license server reported an internal problem.",
                "The server accepted the connection but could not process the \
                 request. This is usually temporary.",
                vec!["Try again in a few minutes", "Contact support if it persists"],
                ErrorSeverity::Error,
            ),
            ErrorCode::OfflinePeriodExceeded => (
                "Offline too long",
                "This installation has been offline longer than the license allows.",
                "The license requires periodic contact with the license server. \
                 Connect to the network to re-validate.",
                vec!["Connect to the network and retry"],
                ErrorSeverity::Critical,
            ),
            ErrorCode::ClockTamperingDetected => (
                "Clock inconsistency detected",
                "The system clock moved backwards.",
                "The system clock is earlier than the last time this installation \
                 ran. License checks are suspended until the clock is corrected.",
                vec!["Correct the system date and time"],
                ErrorSeverity::Critical,
            ),
        };

        Self {
            code,
            title: title.to_string(),
            short_message: short.to_string(),
            detailed_message: detail.to_string(),
            recommended_actions: actions.into_iter().map(String::from).collect(),
            severity,
            can_retry: code.is_retryable(),
            support_context: Uuid::new_v4().to_string(),
        }
    }
}
