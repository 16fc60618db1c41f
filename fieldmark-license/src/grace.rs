//! Grace-period tracking.
//!
//! State machine over `Active | InGracePeriod | Expired`. Once a license's
//! hard expiration passes, the holder gets a bounded grace window with
//! escalating warnings; when the window runs out the state is terminal until
//! renewal. The host drives [`GracePeriodTracker::update_status`] on startup
//! and on its own periodic timer; every mutation persists through the
//! secure store so a restart resumes mid-episode.
//!
//! All decision logic takes an explicit `now` (`*_at` methods); the public
//! wrappers pass `Utc::now()`.

use crate::clock::ClockRatchet;
use crate::config::GraceConfig;
use crate::error::LicenseResult;
use crate::events::{EventBus, LicenseEvent};
use crate::identity::LicenseId;
use crate::store::{RecordKind, SecureStateStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Default warning thresholds in days remaining, strictly descending.
pub const DEFAULT_WARNING_THRESHOLDS: [u32; 3] = [7, 3, 1];

/// Current grace-period state of a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceState {
    /// License is within its validity period.
    Active,
    /// Past hard expiration, inside the grace window.
    InGracePeriod { days_remaining: u32 },
    /// Grace window exhausted; functionality restricted.
    Expired,
}

/// Severity of a grace-period warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    Info,
    Warning,
    Critical,
    Expired,
}

/// A warning the host should surface to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraceWarning {
    pub days_remaining: u32,
    pub severity: WarningSeverity,
    pub title: String,
    pub message: String,
    /// Whether the user may dismiss the warning.
    pub allow_dismiss: bool,
    /// Whether the host should present it modally.
    pub is_modal: bool,
}

/// Builds the warning for a given number of days remaining.
///
/// Pure function; the mapping is a behavioral contract:
/// `0` → Expired (non-dismissible, modal), `1` → Critical ("expires
/// tomorrow"), `<= 3` → Critical, `<= 7` → Warning, otherwise → Info
/// (non-modal).
pub fn create_warning(days_remaining: u32) -> GraceWarning {
    let (severity, title, message) = match days_remaining {
        0 => (
            WarningSeverity::Expired,
            "License expired".to_string(),
            "The grace period has ended. Renew your license to continue working."
                .to_string(),
        ),
        1 => (
            WarningSeverity::Critical,
            "License expires tomorrow".to_string(),
            "The grace period ends tomorrow. Renew now to avoid interruption.".to_string(),
        ),
        d if d <= 3 => (
            WarningSeverity::Critical,
            format!("License expires in {d} days"),
            format!("The grace period ends in {d} days. Renew now to avoid interruption."),
        ),
        d if d <= 7 => (
            WarningSeverity::Warning,
            format!("License expires in {d} days"),
            format!("Your license has expired; the grace period ends in {d} days."),
        ),
        d => (
            WarningSeverity::Info,
            format!("License expires in {d} days"),
            format!("Your license has expired; {d} days of grace remain."),
        ),
    };

    GraceWarning {
        days_remaining,
        severity,
        title,
        message,
        allow_dismiss: days_remaining > 0,
        is_modal: matches!(severity, WarningSeverity::Critical | WarningSeverity::Expired),
    }
}

/// Persisted grace-period bookkeeping for one license.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GracePeriodRecord {
    pub license_id: String,
    pub is_in_grace_period: bool,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub days_remaining: u32,
    pub total_grace_days: u32,
    pub last_warning_date: Option<DateTime<Utc>>,
    /// Day-thresholds that already fired this episode.
    pub warnings_shown: BTreeSet<u32>,
    /// Guards the terminal `GracePeriodExpired` event against refiring.
    #[serde(default)]
    pub expiry_notified: bool,
}

/// Tracks grace-period state for one license.
pub struct GracePeriodTracker {
    license_id: LicenseId,
    store: Arc<SecureStateStore>,
    events: EventBus,
    thresholds: Vec<u32>,
    ratchet: ClockRatchet,
    record: Mutex<GracePeriodRecord>,
}

impl GracePeriodTracker {
    /// Creates a tracker, resuming any persisted episode.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the grace configuration is invalid.
    pub fn new(
        license_id: LicenseId,
        store: Arc<SecureStateStore>,
        events: EventBus,
        config: &GraceConfig,
    ) -> LicenseResult<Self> {
        config.validate()?;
        let record: GracePeriodRecord = store.load(&license_id, RecordKind::Grace);
        let ratchet = ClockRatchet::new(
            store.clone(),
            license_id.clone(),
            config.rollback_tolerance_secs,
        );
        Ok(Self {
            license_id,
            store,
            events,
            thresholds: config.warning_thresholds.clone(),
            ratchet,
            record: Mutex::new(record),
        })
    }

    /// Idempotent per-tick entry point, evaluated at the current time.
    pub fn update_status(
        &self,
        expiration: DateTime<Utc>,
        grace_period_days: u32,
    ) -> LicenseResult<GraceState> {
        self.update_status_at(expiration, grace_period_days, Utc::now())
    }

    /// Idempotent per-tick entry point, evaluated at `now`.
    ///
    /// # Errors
    ///
    /// Returns `ClockTampering` if `now` is behind the persisted high-water
    /// mark; grace state is left untouched in that case.
    pub fn update_status_at(
        &self,
        expiration: DateTime<Utc>,
        grace_period_days: u32,
        now: DateTime<Utc>,
    ) -> LicenseResult<GraceState> {
        self.ratchet.observe(now)?;

        let mut record = self.record.lock().unwrap_or_else(|e| e.into_inner());

        if now <= expiration {
            // License valid (possibly renewed mid-episode).
            if record.is_in_grace_period {
                info!(license_id = %self.license_id, "license renewed, leaving grace period");
                *record = GracePeriodRecord::default();
                self.store.clear(&self.license_id, RecordKind::Grace);
            }
            return Ok(GraceState::Active);
        }

        if !record.is_in_grace_period {
            return self.enter_grace_locked(&mut record, expiration, grace_period_days, now);
        }

        let period_end = record.period_end.unwrap_or(expiration);
        record.days_remaining = days_until(period_end, now);

        if record.days_remaining == 0 {
            if !record.expiry_notified {
                record.expiry_notified = true;
                info!(license_id = %self.license_id, "grace period exhausted");
                self.events.emit(LicenseEvent::GracePeriodExpired {
                    license_id: self.license_id.to_string(),
                });
            }
            self.persist(&record)?;
            return Ok(GraceState::Expired);
        }

        self.evaluate_warnings_locked(&mut record, now);
        self.persist(&record)?;
        Ok(GraceState::InGracePeriod {
            days_remaining: record.days_remaining,
        })
    }

    /// Begins a grace episode, evaluated at the current time.
    pub fn enter_grace_period(
        &self,
        expiration: DateTime<Utc>,
        grace_period_days: u32,
    ) -> LicenseResult<GraceState> {
        self.enter_grace_period_at(expiration, grace_period_days, Utc::now())
    }

    /// Begins a grace episode, evaluated at `now`.
    pub fn enter_grace_period_at(
        &self,
        expiration: DateTime<Utc>,
        grace_period_days: u32,
        now: DateTime<Utc>,
    ) -> LicenseResult<GraceState> {
        let mut record = self.record.lock().unwrap_or_else(|e| e.into_inner());
        self.enter_grace_locked(&mut record, expiration, grace_period_days, now)
    }

    fn enter_grace_locked(
        &self,
        record: &mut GracePeriodRecord,
        expiration: DateTime<Utc>,
        grace_period_days: u32,
        now: DateTime<Utc>,
    ) -> LicenseResult<GraceState> {
        let period_end = expiration + Duration::days(i64::from(grace_period_days));
        *record = GracePeriodRecord {
            license_id: self.license_id.to_string(),
            is_in_grace_period: true,
            period_start: Some(expiration),
            period_end: Some(period_end),
            days_remaining: days_until(period_end, now),
            total_grace_days: grace_period_days,
            last_warning_date: None,
            warnings_shown: BTreeSet::new(),
            expiry_notified: false,
        };

        info!(
            license_id = %self.license_id,
            days_remaining = record.days_remaining,
            %period_end,
            "entering grace period"
        );
        self.events.emit(LicenseEvent::GracePeriodEntered {
            license_id: self.license_id.to_string(),
            days_remaining: record.days_remaining,
            period_end,
        });

        self.evaluate_warnings_locked(record, now);
        self.persist(record)?;

        if record.days_remaining == 0 {
            if !record.expiry_notified {
                record.expiry_notified = true;
                self.events.emit(LicenseEvent::GracePeriodExpired {
                    license_id: self.license_id.to_string(),
                });
                self.persist(record)?;
            }
            return Ok(GraceState::Expired);
        }
        Ok(GraceState::InGracePeriod {
            days_remaining: record.days_remaining,
        })
    }

    /// Evaluates warning thresholds at the current time.
    pub fn check_and_trigger_warnings(&self) -> Option<GraceWarning> {
        self.check_and_trigger_warnings_at(Utc::now())
    }

    /// Evaluates warning thresholds at `now`.
    ///
    /// At most one warning fires per UTC calendar day; among the descending
    /// thresholds, the first unseen one that covers `days_remaining` fires.
    pub fn check_and_trigger_warnings_at(&self, now: DateTime<Utc>) -> Option<GraceWarning> {
        let mut record = self.record.lock().unwrap_or_else(|e| e.into_inner());
        if !record.is_in_grace_period {
            return None;
        }
        let warning = self.evaluate_warnings_locked(&mut record, now);
        if warning.is_some() {
            if let Err(e) = self.persist(&record) {
                debug!(error = %e, "failed to persist warning bookkeeping");
            }
        }
        warning
    }

    fn evaluate_warnings_locked(
        &self,
        record: &mut GracePeriodRecord,
        now: DateTime<Utc>,
    ) -> Option<GraceWarning> {
        // One warning per UTC calendar day, no matter how often we tick.
        if let Some(last) = record.last_warning_date {
            if last.date_naive() == now.date_naive() {
                return None;
            }
        }

        for &threshold in &self.thresholds {
            if record.days_remaining <= threshold && !record.warnings_shown.contains(&threshold) {
                let warning = create_warning(record.days_remaining);
                record.warnings_shown.insert(threshold);
                record.last_warning_date = Some(now);
                debug!(
                    license_id = %self.license_id,
                    threshold,
                    days_remaining = record.days_remaining,
                    "grace warning fired"
                );
                self.events.emit(LicenseEvent::WarningTriggered {
                    license_id: self.license_id.to_string(),
                    warning: warning.clone(),
                });
                return Some(warning);
            }
        }
        None
    }

    /// Clears all grace fields; used on renewal.
    pub fn exit_grace_period(&self) {
        let mut record = self.record.lock().unwrap_or_else(|e| e.into_inner());
        *record = GracePeriodRecord::default();
        self.store.clear(&self.license_id, RecordKind::Grace);
    }

    /// Alias for [`exit_grace_period`](Self::exit_grace_period).
    pub fn reset(&self) {
        self.exit_grace_period();
    }

    /// Returns the current state without evaluating warnings.
    pub fn state(&self) -> GraceState {
        let record = self.record.lock().unwrap_or_else(|e| e.into_inner());
        if !record.is_in_grace_period {
            GraceState::Active
        } else if record.days_remaining == 0 {
            GraceState::Expired
        } else {
            GraceState::InGracePeriod {
                days_remaining: record.days_remaining,
            }
        }
    }

    /// Returns a snapshot of the persisted record.
    pub fn record(&self) -> GracePeriodRecord {
        self.record
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn persist(&self, record: &GracePeriodRecord) -> LicenseResult<()> {
        self.store.save(&self.license_id, RecordKind::Grace, record)
    }
}

/// Whole days from `now` until `end`, clamped at zero.
fn days_until(end: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let days = (end - now).num_days();
    u32::try_from(days).unwrap_or(0)
}
