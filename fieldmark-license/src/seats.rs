//! Concurrent-seat leasing.
//!
//! The server is authoritative for seat counts; this client holds at most
//! one session id for the local process and keeps it alive with a single
//! background heartbeat task. Heartbeats are strictly sequential — the task
//! awaits each round trip before the next tick, so the server never observes
//! out-of-order liveness signals.
//!
//! The failure asymmetry is deliberate: an explicit `success=false` reply
//! ends the lease and raises `SeatLost`; a network failure (timeout, refused
//! connection, 5xx) is transient and the next tick retries. A flaky network
//! must not self-evict a legitimate user.

use crate::config::SeatLeaseConfig;
use crate::error::{LicenseError, LicenseResult};
use crate::events::{EventBus, LicenseEvent};
use crate::identity::{LicenseId, MachineIdentity};
use crate::server::{
    AcquireSeatRequest, HeartbeatRequest, LicenseServerClient, ReleaseSeatRequest,
    SeatSessionInfo,
};
use crate::store::{RecordKind, SecureStateStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Outcome of a seat acquisition attempt.
#[derive(Debug, Clone)]
pub struct SeatAcquisition {
    /// Whether a seat is held after the call.
    pub acquired: bool,
    pub session_id: Option<String>,
    pub seats_used: u32,
    pub seats_available: u32,
    pub message: Option<String>,
    /// Sessions reported by the server when acquisition is rejected.
    pub active_sessions: Vec<SeatSessionInfo>,
}

/// Seat usage answer; degraded (`server_reachable == false`) answers come
/// from the local usage cache.
#[derive(Debug, Clone)]
pub struct SeatStatus {
    pub server_reachable: bool,
    pub max_seats: Option<u32>,
    pub seats_used: Option<u32>,
    pub active_sessions: Vec<SeatSessionInfo>,
    pub local_session_id: Option<String>,
}

/// Persisted cache of the last seat usage the server reported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeatUsageCache {
    pub session_id: Option<String>,
    pub seats_used: u32,
    pub seats_available: u32,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Leases one concurrent seat for this installation.
pub struct SeatLeaseClient {
    server: Arc<LicenseServerClient>,
    store: Arc<SecureStateStore>,
    events: EventBus,
    config: SeatLeaseConfig,
    license_id: LicenseId,
    identity: MachineIdentity,
    session: Arc<tokio::sync::Mutex<Option<String>>>,
    heartbeat: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SeatLeaseClient {
    /// Creates a seat lease client.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` unless the heartbeat interval is strictly
    /// less than the server session timeout.
    pub fn new(
        server: Arc<LicenseServerClient>,
        store: Arc<SecureStateStore>,
        events: EventBus,
        config: SeatLeaseConfig,
        license_id: LicenseId,
        identity: MachineIdentity,
    ) -> LicenseResult<Self> {
        config.validate()?;
        Ok(Self {
            server,
            store,
            events,
            config,
            license_id,
            identity,
            session: Arc::new(tokio::sync::Mutex::new(None)),
            heartbeat: std::sync::Mutex::new(None),
        })
    }

    /// Acquires a seat for this installation.
    ///
    /// A no-op success if a session is already held. On rejection
    /// (`acquired == false`) the server's session list is returned and
    /// `SeatLimitReached` is raised; no retry is attempted automatically.
    ///
    /// # Errors
    ///
    /// Returns an error only for network/server faults; a full license is a
    /// protocol outcome, not an error.
    pub async fn acquire_seat(&self) -> LicenseResult<SeatAcquisition> {
        let mut session = self.session.lock().await;

        if let Some(session_id) = session.as_ref() {
            let cache: SeatUsageCache = self.store.load(&self.license_id, RecordKind::Usage);
            return Ok(SeatAcquisition {
                acquired: true,
                session_id: Some(session_id.clone()),
                seats_used: cache.seats_used,
                seats_available: cache.seats_available,
                message: None,
                active_sessions: Vec::new(),
            });
        }

        let request = AcquireSeatRequest {
            license_id: self.license_id.to_string(),
            hardware_fingerprint: self.identity.primary_fingerprint().to_string(),
            machine_name: self.identity.machine_name.clone(),
            user_name: self.identity.user_name.clone(),
            timeout_minutes: self.config.session_timeout_minutes,
        };
        let response = self.server.acquire_seat(&request).await?;

        if response.success {
            let Some(session_id) = response.session_id else {
                return Err(LicenseError::Server {
                    status: 200,
                    message: "acquire succeeded without a session id".to_string(),
                });
            };

            info!(
                license_id = %self.license_id,
                session_id = %session_id,
                seats_used = response.seats_used,
                "seat acquired"
            );
            *session = Some(session_id.clone());
            self.write_usage_cache(Some(&session_id), response.seats_used, response.seats_available);
            self.start_heartbeat(session_id.clone());

            return Ok(SeatAcquisition {
                acquired: true,
                session_id: Some(session_id),
                seats_used: response.seats_used,
                seats_available: response.seats_available,
                message: response.message,
                active_sessions: response.active_sessions,
            });
        }

        let max_seats = response.max_seats.unwrap_or(response.seats_used);
        info!(
            license_id = %self.license_id,
            max_seats,
            seats_used = response.seats_used,
            "seat acquisition rejected, license full"
        );
        self.events.emit(LicenseEvent::SeatLimitReached {
            max_seats,
            seats_used: response.seats_used,
            active_sessions: response.active_sessions.clone(),
        });

        Ok(SeatAcquisition {
            acquired: false,
            session_id: None,
            seats_used: response.seats_used,
            seats_available: response.seats_available,
            message: response.message,
            active_sessions: response.active_sessions,
        })
    }

    /// Releases the held seat, if any.
    ///
    /// Stops the heartbeat first so no tick can race the release, then
    /// best-effort notifies the server. The local session id is cleared
    /// unconditionally — local state must never hold a phantom seat.
    pub async fn release_seat(&self) -> LicenseResult<()> {
        self.stop_heartbeat();

        let session_id = self.session.lock().await.take();
        self.write_usage_cache(None, 0, 0);

        if let Some(session_id) = session_id {
            let request = ReleaseSeatRequest {
                license_id: self.license_id.to_string(),
                session_id: session_id.clone(),
            };
            if let Err(e) = self.server.release_seat(&request).await {
                warn!(session_id = %session_id, error = %e, "seat release not acknowledged");
            } else {
                info!(session_id = %session_id, "seat released");
            }
        }
        Ok(())
    }

    /// Releases an arbitrary session (admin path, no local precondition).
    pub async fn force_release_session(&self, session_id: &str) -> LicenseResult<()> {
        let request = ReleaseSeatRequest {
            license_id: self.license_id.to_string(),
            session_id: session_id.to_string(),
        };
        self.server.force_release(&request).await
    }

    /// Returns current seat usage; degrades to the local cache when the
    /// server is unreachable.
    pub async fn seat_status(&self) -> SeatStatus {
        let local_session_id = self.session.lock().await.clone();

        match self.server.seat_status(self.license_id.as_str()).await {
            Ok(status) => SeatStatus {
                server_reachable: true,
                max_seats: Some(status.max_seats),
                seats_used: Some(status.seats_used),
                active_sessions: status.active_sessions,
                local_session_id,
            },
            Err(e) => {
                debug!(error = %e, "seat status unavailable, answering from cache");
                let cache: SeatUsageCache = self.store.load(&self.license_id, RecordKind::Usage);
                SeatStatus {
                    server_reachable: false,
                    max_seats: None,
                    seats_used: cache.updated_at.map(|_| cache.seats_used),
                    active_sessions: Vec::new(),
                    local_session_id,
                }
            }
        }
    }

    /// Returns the server's session list, or empty if unreachable.
    pub async fn active_sessions(&self) -> Vec<SeatSessionInfo> {
        match self.server.active_sessions(self.license_id.as_str()).await {
            Ok(sessions) => sessions,
            Err(e) => {
                debug!(error = %e, "session list unavailable");
                Vec::new()
            }
        }
    }

    /// Returns the locally held session id, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session.lock().await.clone()
    }

    fn write_usage_cache(&self, session_id: Option<&str>, used: u32, available: u32) {
        let cache = SeatUsageCache {
            session_id: session_id.map(String::from),
            seats_used: used,
            seats_available: available,
            updated_at: Some(Utc::now()),
        };
        if let Err(e) = self.store.save(&self.license_id, RecordKind::Usage, &cache) {
            warn!(error = %e, "failed to persist seat usage cache");
        }
    }

    fn start_heartbeat(&self, session_id: String) {
        self.stop_heartbeat();

        let server = self.server.clone();
        let store = self.store.clone();
        let events = self.events.clone();
        let session = self.session.clone();
        let license_id = self.license_id.clone();
        let interval_secs = self.config.heartbeat_interval_secs;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the seat was just
            // acquired, so skip it.
            ticker.tick().await;

            let request = HeartbeatRequest {
                license_id: license_id.to_string(),
                session_id: session_id.clone(),
            };

            loop {
                ticker.tick().await;

                match server.heartbeat(&request).await {
                    Ok(response) if response.success => {
                        debug!(session_id = %session_id, "heartbeat acknowledged");
                        if let Some(used) = response.seats_used {
                            let cache = SeatUsageCache {
                                session_id: Some(session_id.clone()),
                                seats_used: used,
                                seats_available: 0,
                                updated_at: Some(Utc::now()),
                            };
                            if let Err(e) =
                                store.save(&license_id, RecordKind::Usage, &cache)
                            {
                                warn!(error = %e, "failed to persist seat usage cache");
                            }
                        }
                    }
                    Ok(response) => {
                        // Explicit rejection: the lease is over.
                        let reason = response
                            .reason
                            .or(response.message)
                            .unwrap_or_else(|| "session rejected by server".to_string());
                        warn!(session_id = %session_id, %reason, "seat lost");
                        session.lock().await.take();
                        // Dead session must not linger in the usage cache,
                        // or degraded status queries keep reporting it.
                        let cleared = SeatUsageCache {
                            session_id: None,
                            seats_used: 0,
                            seats_available: 0,
                            updated_at: Some(Utc::now()),
                        };
                        if let Err(e) = store.save(&license_id, RecordKind::Usage, &cleared) {
                            warn!(error = %e, "failed to persist seat usage cache");
                        }
                        events.emit(LicenseEvent::SeatLost {
                            session_id: session_id.clone(),
                            reason,
                            lost_at: Utc::now(),
                        });
                        break;
                    }
                    Err(e) => {
                        // Transient: no verdict from the server. Retry on
                        // the next tick.
                        debug!(session_id = %session_id, error = %e, "heartbeat failed, will retry");
                    }
                }
            }
        });

        *self.heartbeat.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Synchronously stops the heartbeat task.
    fn stop_heartbeat(&self) {
        if let Some(handle) = self
            .heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for SeatLeaseClient {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}
