//! Runtime events exposed to the host application.
//!
//! The host subscribes to render dialogs and status-bar text; it never
//! mutates runtime state through this channel. Delivery is fire-and-forget
//! over a broadcast channel: emitting never blocks the runtime, and a
//! subscriber that falls behind sees a lag error rather than back-pressuring
//! protocol code.

use crate::grace::GraceWarning;
use crate::server::SeatSessionInfo;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

/// Default buffered capacity per subscriber.
const EVENT_CAPACITY: usize = 64;

/// Events raised by the license runtime.
#[derive(Debug, Clone)]
pub enum LicenseEvent {
    /// The license passed its hard expiration and a grace episode began.
    GracePeriodEntered {
        license_id: String,
        days_remaining: u32,
        period_end: DateTime<Utc>,
    },
    /// An escalation warning fired (at most one per UTC calendar day).
    WarningTriggered {
        license_id: String,
        warning: GraceWarning,
    },
    /// The grace window ran out; functionality is now restricted.
    GracePeriodExpired { license_id: String },
    /// The server rejected a heartbeat and the local seat was released.
    SeatLost {
        session_id: String,
        reason: String,
        lost_at: DateTime<Utc>,
    },
    /// Seat acquisition was rejected because every seat is in use.
    SeatLimitReached {
        max_seats: u32,
        seats_used: u32,
        active_sessions: Vec<SeatSessionInfo>,
    },
    /// A transfer token was generated on this machine.
    TransferInitiated {
        license_id: String,
        expires_at: DateTime<Utc>,
        remaining_transfers: u32,
    },
    /// A transfer to this machine completed.
    TransferCompleted {
        license_id: String,
        transferred_at: DateTime<Utc>,
    },
}

/// Broadcast bus for runtime events.
///
/// Cloning is cheap; every component holds a clone and the host subscribes
/// as many times as it likes.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LicenseEvent>,
}

impl EventBus {
    /// Creates a bus with the default per-subscriber capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Subscribes to runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<LicenseEvent> {
        self.tx.subscribe()
    }

    /// Emits an event to all subscribers. Never blocks; an event with no
    /// subscribers is dropped.
    pub fn emit(&self, event: LicenseEvent) {
        trace!(?event, "emitting license event");
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
