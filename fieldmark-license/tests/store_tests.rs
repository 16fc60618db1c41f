mod common;

use common::{open_store, store_config, FixedSecret};
use fieldmark_crypto::KdfParams;
use fieldmark_license::{
    GracePeriodRecord, LicenseId, RecordKind, SecureStateStore, SeatUsageCache,
};
use tempfile::TempDir;

fn lic() -> LicenseId {
    LicenseId::from("LIC-STORE-1")
}

fn sample_record() -> GracePeriodRecord {
    GracePeriodRecord {
        license_id: "LIC-STORE-1".to_string(),
        is_in_grace_period: true,
        period_start: Some(chrono::Utc::now()),
        period_end: Some(chrono::Utc::now() + chrono::Duration::days(14)),
        days_remaining: 14,
        total_grace_days: 14,
        last_warning_date: None,
        warnings_shown: [7u32].into_iter().collect(),
        expiry_notified: false,
    }
}

// ── Round trip ──────────────────────────────────────────────────

#[test]
fn save_load_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    let record = sample_record();

    store.save(&lic(), RecordKind::Grace, &record).unwrap();
    let loaded: GracePeriodRecord = store.load(&lic(), RecordKind::Grace);

    assert!(loaded.is_in_grace_period);
    assert_eq!(loaded.days_remaining, 14);
    assert_eq!(loaded.warnings_shown, record.warnings_shown);
    assert_eq!(loaded.period_end, record.period_end);
}

#[test]
fn record_kinds_do_not_collide() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());

    store.save(&lic(), RecordKind::Grace, &sample_record()).unwrap();
    let usage: SeatUsageCache = store.load(&lic(), RecordKind::Usage);
    assert!(usage.session_id.is_none(), "usage kind must start empty");
}

#[test]
fn licenses_are_isolated() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());

    store.save(&lic(), RecordKind::Grace, &sample_record()).unwrap();
    let other: GracePeriodRecord = store.load(&LicenseId::from("LIC-OTHER"), RecordKind::Grace);
    assert!(!other.is_in_grace_period);
}

// ── Degradation ─────────────────────────────────────────────────

#[test]
fn missing_record_loads_default() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    let loaded: GracePeriodRecord = store.load(&lic(), RecordKind::Grace);
    assert!(!loaded.is_in_grace_period);
    assert_eq!(loaded.days_remaining, 0);
}

#[test]
fn corrupted_ciphertext_loads_default() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    store.save(&lic(), RecordKind::Grace, &sample_record()).unwrap();

    // Corrupt both copies; load must degrade, not panic or error.
    for sub in ["primary", "mirror"] {
        let path = dir.path().join(sub).join("LIC-STORE-1.grace.rec");
        std::fs::write(&path, "definitely-not-ciphertext").unwrap();
    }

    let loaded: GracePeriodRecord = store.load(&lic(), RecordKind::Grace);
    assert!(!loaded.is_in_grace_period);
}

#[test]
fn wrong_key_loads_default() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    store.save(&lic(), RecordKind::Grace, &sample_record()).unwrap();

    // Same files, different entropy: decryption fails, defaults win.
    let mut config = store_config(dir.path());
    config.entropy = b"different-entropy".to_vec();
    let other =
        SecureStateStore::open_with_secret(&config, &FixedSecret, &KdfParams::fast_insecure())
            .unwrap();

    let loaded: GracePeriodRecord = other.load(&lic(), RecordKind::Grace);
    assert!(!loaded.is_in_grace_period);
}

// ── Mirroring ───────────────────────────────────────────────────

#[test]
fn deleted_primary_recovers_from_mirror() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    store.save(&lic(), RecordKind::Grace, &sample_record()).unwrap();

    std::fs::remove_file(dir.path().join("primary").join("LIC-STORE-1.grace.rec")).unwrap();

    let loaded: GracePeriodRecord = store.load(&lic(), RecordKind::Grace);
    assert!(loaded.is_in_grace_period, "mirror copy should be used");
}

#[test]
fn clear_removes_primary_and_mirror() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    store.save(&lic(), RecordKind::Grace, &sample_record()).unwrap();

    store.clear(&lic(), RecordKind::Grace);

    assert!(!dir.path().join("primary").join("LIC-STORE-1.grace.rec").exists());
    assert!(!dir.path().join("mirror").join("LIC-STORE-1.grace.rec").exists());
    let loaded: GracePeriodRecord = store.load(&lic(), RecordKind::Grace);
    assert!(!loaded.is_in_grace_period);
}

// ── File naming ─────────────────────────────────────────────────

#[test]
fn hostile_license_id_is_sanitized() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    let hostile = LicenseId::from("../../etc/passwd");

    store.save(&hostile, RecordKind::Grace, &sample_record()).unwrap();

    // Everything lands inside the store directory.
    let entries: Vec<_> = std::fs::read_dir(dir.path().join("primary"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert!(entries.iter().any(|n| n.ends_with(".grace.rec")));
    assert!(entries.iter().all(|n| !n.contains("..")));
}

#[test]
fn ciphertext_on_disk_is_not_plaintext() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    store.save(&lic(), RecordKind::Grace, &sample_record()).unwrap();

    let on_disk =
        std::fs::read_to_string(dir.path().join("primary").join("LIC-STORE-1.grace.rec")).unwrap();
    assert!(!on_disk.contains("is_in_grace_period"));
    assert!(!on_disk.contains("LIC-STORE-1"));
}
