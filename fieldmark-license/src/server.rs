//! HTTP client for the license server.
//!
//! One method per endpoint, typed camelCase wire structs matching the server
//! contract. This client does no retrying and holds no protocol state; the
//! three runtime components own their own scheduling and interpretation of
//! results.

use crate::config::ServerConfig;
use crate::error::{ErrorCode, LicenseError, LicenseResult};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// A seat session as reported by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatSessionInfo {
    pub session_id: String,
    pub license_id: String,
    pub machine_name: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub hardware_fingerprint: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

// ── Transfer wire types ─────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateTransferRequest {
    pub license_id: String,
    pub source_fingerprints: Vec<String>,
    pub source_machine_name: String,
    pub validity_hours: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateTransferResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub transfer_number: u32,
    pub remaining_transfers: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct ValidateTransferRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ValidateTransferResponse {
    pub is_valid: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_machine: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompleteTransferRequest {
    pub token: String,
    pub target_fingerprints: Vec<String>,
    pub target_machine_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompleteTransferResponse {
    pub license_id: String,
    pub new_license_data: String,
    pub transferred_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CancelTransferRequest {
    pub token: String,
}

// ── Seat wire types ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AcquireSeatRequest {
    pub license_id: String,
    pub hardware_fingerprint: String,
    pub machine_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub timeout_minutes: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AcquireSeatResponse {
    pub success: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    pub seats_used: u32,
    pub seats_available: u32,
    #[serde(default)]
    pub max_seats: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub active_sessions: Vec<SeatSessionInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HeartbeatRequest {
    pub license_id: String,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HeartbeatResponse {
    pub success: bool,
    #[serde(default)]
    pub seats_used: Option<u32>,
    #[serde(default)]
    pub time_until_expiry: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReleaseSeatRequest {
    pub license_id: String,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SeatStatusResponse {
    pub max_seats: u32,
    pub seats_used: u32,
    #[serde(default)]
    pub active_sessions: Vec<SeatSessionInfo>,
}

/// Error body the server sends on rejections.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    error_code: String,
    #[serde(default)]
    message: Option<String>,
}

/// Thin HTTP abstraction over the license server.
pub struct LicenseServerClient {
    client: Client,
    base_url: String,
}

impl LicenseServerClient {
    /// Creates a client for the given server config.
    pub fn new(config: &ServerConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("failed to create HTTP client");

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// POSTs `body` to `path` and decodes a typed response.
    async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> LicenseResult<R> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| LicenseError::Network(e.to_string()))?;
        Self::decode(path, response).await
    }

    /// POSTs `body` to `path`, expecting only a 2xx status (body ignored).
    async fn post_unit<B: Serialize>(&self, path: &str, body: &B) -> LicenseResult<()> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| LicenseError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::rejection(path, status, body))
    }

    /// GETs `path` with query parameters and decodes a typed response.
    async fn get_json<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> LicenseResult<R> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| LicenseError::Network(e.to_string()))?;
        Self::decode(path, response).await
    }

    async fn decode<R: DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> LicenseResult<R> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| LicenseError::Network(format!("invalid response body: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        Err(Self::rejection(path, status, body))
    }

    /// Interprets a non-2xx response as a taxonomy error where possible.
    fn rejection(path: &str, status: reqwest::StatusCode, body: String) -> LicenseError {
        if let Ok(api_err) = serde_json::from_str::<ApiErrorBody>(&body) {
            let message = api_err.message.unwrap_or_default();
            if let Ok(code) = api_err.error_code.parse::<ErrorCode>() {
                debug!(%path, code = %code, "server rejected request");
                return error_for_code(code, message);
            }
            warn!(%path, code = %api_err.error_code, "server sent unknown error code");
            return LicenseError::Server {
                status: status.as_u16(),
                message: format!("{}: {message}", api_err.error_code),
            };
        }

        LicenseError::Server {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        }
    }

    // ── Transfer endpoints ──────────────────────────────────────

    pub(crate) async fn generate_transfer(
        &self,
        req: &GenerateTransferRequest,
    ) -> LicenseResult<GenerateTransferResponse> {
        self.post_json("/api/license/transfer/generate", req).await
    }

    pub(crate) async fn validate_transfer(
        &self,
        req: &ValidateTransferRequest,
    ) -> LicenseResult<ValidateTransferResponse> {
        self.post_json("/api/license/transfer/validate", req).await
    }

    pub(crate) async fn complete_transfer(
        &self,
        req: &CompleteTransferRequest,
    ) -> LicenseResult<CompleteTransferResponse> {
        self.post_json("/api/license/transfer/complete", req).await
    }

    pub(crate) async fn cancel_transfer(
        &self,
        req: &CancelTransferRequest,
    ) -> LicenseResult<()> {
        self.post_unit("/api/license/transfer/cancel", req).await
    }

    // ── Seat endpoints ──────────────────────────────────────────

    pub(crate) async fn acquire_seat(
        &self,
        req: &AcquireSeatRequest,
    ) -> LicenseResult<AcquireSeatResponse> {
        self.post_json("/api/license/seats/acquire", req).await
    }

    pub(crate) async fn heartbeat(
        &self,
        req: &HeartbeatRequest,
    ) -> LicenseResult<HeartbeatResponse> {
        self.post_json("/api/license/seats/heartbeat", req).await
    }

    pub(crate) async fn release_seat(&self, req: &ReleaseSeatRequest) -> LicenseResult<()> {
        self.post_unit("/api/license/seats/release", req).await
    }

    pub(crate) async fn seat_status(&self, license_id: &str) -> LicenseResult<SeatStatusResponse> {
        self.get_json("/api/license/seats/status", &[("licenseId", license_id)])
            .await
    }

    pub(crate) async fn active_sessions(
        &self,
        license_id: &str,
    ) -> LicenseResult<Vec<SeatSessionInfo>> {
        self.get_json("/api/license/seats/sessions", &[("licenseId", license_id)])
            .await
    }

    pub(crate) async fn force_release(&self, req: &ReleaseSeatRequest) -> LicenseResult<()> {
        self.post_unit("/api/license/seats/force-release", req).await
    }
}

/// Maps a server error code to the corresponding runtime error.
fn error_for_code(code: ErrorCode, message: String) -> LicenseError {
    match code {
        ErrorCode::LicenseExpired | ErrorCode::GracePeriod => LicenseError::Expired(message),
        ErrorCode::LicenseRevoked => LicenseError::Revoked,
        ErrorCode::LicenseNotFound => LicenseError::NotFound(message),
        ErrorCode::InvalidSignature => LicenseError::InvalidSignature,
        ErrorCode::LicenseCorrupted => LicenseError::Corrupted(message),
        ErrorCode::HardwareMismatch => LicenseError::HardwareMismatch,
        ErrorCode::SeatLimitExceeded => LicenseError::SeatLimitExceeded(if message.is_empty() {
            "all seats are in use".to_string()
        } else {
            message
        }),
        ErrorCode::TransferLimitReached => LicenseError::TransferLimitReached,
        ErrorCode::TokenExpired => LicenseError::TokenExpired,
        ErrorCode::TokenUsed => LicenseError::TokenUsed,
        ErrorCode::SameMachine => LicenseError::SameMachine,
        ErrorCode::NetworkError => LicenseError::Network(message),
        ErrorCode::ServerError => LicenseError::Server {
            status: 500,
            message,
        },
        ErrorCode::OfflinePeriodExceeded => LicenseError::OfflinePeriodExceeded,
        ErrorCode::ClockTamperingDetected => LicenseError::ClockTampering {
            observed: Utc::now(),
            last_seen: Utc::now(),
        },
    }
}
