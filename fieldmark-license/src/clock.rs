//! Clock-rollback detection.
//!
//! Grace-period math runs on the wall clock, which a user can roll back to
//! stretch a grace window. The ratchet persists the latest timestamp ever
//! observed; a check that runs earlier than that high-water mark (beyond a
//! small tolerance for NTP corrections) fails with `ClockTampering` and the
//! caller leaves its state untouched. Forward jumps are never flagged — a
//! machine that was powered off for a month is not tampering.

use crate::error::{LicenseError, LicenseResult};
use crate::identity::LicenseId;
use crate::store::{RecordKind, SecureStateStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Default tolerated backward drift (5 minutes).
pub const DEFAULT_ROLLBACK_TOLERANCE_SECS: u64 = 5 * 60;

/// Persisted high-water mark.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ClockRecord {
    last_seen: Option<DateTime<Utc>>,
}

/// Persisted last-seen-time ratchet.
pub struct ClockRatchet {
    store: Arc<SecureStateStore>,
    license_id: LicenseId,
    tolerance: Duration,
}

impl ClockRatchet {
    /// Creates a ratchet persisting through `store` for `license_id`.
    pub fn new(store: Arc<SecureStateStore>, license_id: LicenseId, tolerance_secs: u64) -> Self {
        Self {
            store,
            license_id,
            tolerance: Duration::seconds(tolerance_secs as i64),
        }
    }

    /// Checks `now` against the persisted high-water mark and advances it.
    ///
    /// # Errors
    ///
    /// Returns `ClockTampering` if `now` is behind the high-water mark by
    /// more than the tolerance. The mark is not advanced in that case, so
    /// repeated checks keep failing until the clock catches up.
    pub fn observe(&self, now: DateTime<Utc>) -> LicenseResult<()> {
        let record: ClockRecord = self.store.load(&self.license_id, RecordKind::Clock);

        if let Some(last_seen) = record.last_seen {
            if now + self.tolerance < last_seen {
                warn!(%now, %last_seen, "wall clock behind persisted high-water mark");
                return Err(LicenseError::ClockTampering {
                    observed: now,
                    last_seen,
                });
            }
            if now <= last_seen {
                // Within tolerance; keep the existing mark.
                return Ok(());
            }
        }

        let updated = ClockRecord {
            last_seen: Some(now),
        };
        // A failed ratchet write must not block license checks.
        if let Err(e) = self.store.save(&self.license_id, RecordKind::Clock, &updated) {
            warn!(error = %e, "failed to persist clock ratchet");
        }
        Ok(())
    }

    /// Clears the persisted mark (used when the license is removed).
    pub fn reset(&self) {
        self.store.clear(&self.license_id, RecordKind::Clock);
    }
}
