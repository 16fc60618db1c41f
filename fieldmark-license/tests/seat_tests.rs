mod common;

use common::{
    bus_with_subscriber, drain_events, init_tracing, open_store, server_config, wait_for_event,
};
use fieldmark_license::{
    EventBus, LicenseError, LicenseEvent, LicenseId, LicenseServerClient, MachineIdentity,
    RecordKind, SeatLeaseClient, SeatLeaseConfig, SeatUsageCache,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn identity() -> MachineIdentity {
    MachineIdentity {
        fingerprints: vec!["fp-primary".to_string(), "fp-secondary".to_string()],
        machine_name: "test-machine".to_string(),
        user_name: Some("tester".to_string()),
    }
}

fn lease_client(
    base_url: &str,
    root: &Path,
    config: SeatLeaseConfig,
) -> (SeatLeaseClient, broadcast::Receiver<LicenseEvent>) {
    let server = Arc::new(LicenseServerClient::new(&server_config(base_url)));
    let store = open_store(root);
    let (bus, rx) = bus_with_subscriber();
    let client = SeatLeaseClient::new(
        server,
        store,
        bus,
        config,
        LicenseId::from("LIC-SEATS-1"),
        identity(),
    )
    .unwrap();
    (client, rx)
}

fn session_json(id: &str) -> serde_json::Value {
    let now = chrono::Utc::now().to_rfc3339();
    json!({
        "sessionId": id,
        "licenseId": "LIC-SEATS-1",
        "machineName": format!("machine-{id}"),
        "userName": "someone",
        "hardwareFingerprint": "fp-x",
        "startedAt": now,
        "lastHeartbeat": now,
    })
}

// ── Configuration invariant ─────────────────────────────────────

#[test]
fn heartbeat_must_be_shorter_than_session_timeout() {
    let invalid = SeatLeaseConfig {
        heartbeat_interval_secs: 300,
        session_timeout_minutes: 5,
    };
    assert!(invalid.validate().is_err(), "300s heartbeat == 300s timeout");

    let invalid = SeatLeaseConfig {
        heartbeat_interval_secs: 301,
        session_timeout_minutes: 5,
    };
    assert!(invalid.validate().is_err());

    let valid = SeatLeaseConfig::default();
    assert!(valid.validate().is_ok());
    assert!(valid.heartbeat_interval_secs < valid.session_timeout_minutes * 60);
}

#[tokio::test]
async fn invalid_config_rejected_at_construction() {
    let dir = TempDir::new().unwrap();
    let server = Arc::new(LicenseServerClient::new(&server_config("http://127.0.0.1:1")));
    let store = open_store(dir.path());
    let result = SeatLeaseClient::new(
        server,
        store,
        EventBus::new(),
        SeatLeaseConfig {
            heartbeat_interval_secs: 600,
            session_timeout_minutes: 5,
        },
        LicenseId::from("LIC-SEATS-1"),
        identity(),
    );
    assert!(result.is_err());
}

// ── Acquisition ─────────────────────────────────────────────────

#[tokio::test]
async fn acquire_stores_session_and_reports_counts() {
    let dir = TempDir::new().unwrap();
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/acquire"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "sessionId": "sess-1",
            "seatsUsed": 1,
            "seatsAvailable": 2,
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let (client, _rx) = lease_client(&mock.uri(), dir.path(), SeatLeaseConfig::default());

    let outcome = client.acquire_seat().await.unwrap();
    assert!(outcome.acquired);
    assert_eq!(outcome.session_id.as_deref(), Some("sess-1"));
    assert_eq!(outcome.seats_used, 1);
    assert_eq!(outcome.seats_available, 2);
    assert_eq!(client.session_id().await.as_deref(), Some("sess-1"));
}

#[tokio::test]
async fn acquire_is_noop_when_session_held() {
    let dir = TempDir::new().unwrap();
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/acquire"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "sessionId": "sess-1",
            "seatsUsed": 1,
            "seatsAvailable": 2,
        })))
        .expect(1) // the second acquire must not hit the server
        .mount(&mock)
        .await;

    let (client, _rx) = lease_client(&mock.uri(), dir.path(), SeatLeaseConfig::default());

    client.acquire_seat().await.unwrap();
    let second = client.acquire_seat().await.unwrap();
    assert!(second.acquired);
    assert_eq!(second.session_id.as_deref(), Some("sess-1"));
}

#[tokio::test]
async fn full_license_rejects_and_raises_seat_limit_reached() {
    let dir = TempDir::new().unwrap();
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/acquire"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "seatsUsed": 3,
            "seatsAvailable": 0,
            "maxSeats": 3,
            "message": "all seats in use",
            "activeSessions": [session_json("a"), session_json("b"), session_json("c")],
        })))
        .mount(&mock)
        .await;

    let (client, mut rx) = lease_client(&mock.uri(), dir.path(), SeatLeaseConfig::default());

    let outcome = client.acquire_seat().await.unwrap();
    assert!(!outcome.acquired);
    assert_eq!(outcome.seats_used, 3);
    assert_eq!(outcome.active_sessions.len(), 3);
    assert!(client.session_id().await.is_none());

    let events = drain_events(&mut rx);
    let [LicenseEvent::SeatLimitReached {
        max_seats,
        seats_used,
        active_sessions,
    }] = events.as_slice()
    else {
        panic!("expected SeatLimitReached, got {events:?}");
    };
    assert_eq!(*max_seats, 3);
    assert_eq!(*seats_used, 3);
    assert_eq!(active_sessions.len(), 3);
}

#[tokio::test]
async fn acquire_network_failure_is_an_error_not_a_rejection() {
    let dir = TempDir::new().unwrap();
    let (client, mut rx) = lease_client(
        "http://127.0.0.1:1",
        dir.path(),
        SeatLeaseConfig::default(),
    );

    let result = client.acquire_seat().await;
    assert!(result.is_err());
    assert!(result.err().map(|e| e.can_retry()).unwrap_or(false));
    assert!(drain_events(&mut rx).is_empty(), "no seat events on network failure");
}

#[tokio::test]
async fn seat_limit_error_body_keeps_the_server_message() {
    let dir = TempDir::new().unwrap();
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/acquire"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "errorCode": "SEAT_LIMIT_EXCEEDED",
            "message": "3 of 3 seats in use",
        })))
        .mount(&mock)
        .await;

    let (client, _rx) = lease_client(&mock.uri(), dir.path(), SeatLeaseConfig::default());

    let err = client.acquire_seat().await.unwrap_err();
    let LicenseError::SeatLimitExceeded(message) = &err else {
        panic!("expected SeatLimitExceeded, got {err:?}");
    };
    assert_eq!(message, "3 of 3 seats in use");
    assert_eq!(err.to_string(), "seat limit exceeded: 3 of 3 seats in use");
}

// ── Heartbeat ───────────────────────────────────────────────────

#[tokio::test]
async fn explicit_heartbeat_rejection_loses_the_seat() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/acquire"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "sessionId": "sess-hb",
            "seatsUsed": 1,
            "seatsAvailable": 0,
        })))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "reason": "session expired",
        })))
        .mount(&mock)
        .await;

    let (client, mut rx) = lease_client(
        &mock.uri(),
        dir.path(),
        SeatLeaseConfig {
            heartbeat_interval_secs: 1,
            session_timeout_minutes: 1,
        },
    );

    client.acquire_seat().await.unwrap();

    let lost = wait_for_event(&mut rx, Duration::from_secs(5), |e| {
        matches!(e, LicenseEvent::SeatLost { .. })
    })
    .await;
    let Some(LicenseEvent::SeatLost { session_id, reason, .. }) = lost else {
        panic!("expected SeatLost");
    };
    assert_eq!(session_id, "sess-hb");
    assert_eq!(reason, "session expired");
    assert!(client.session_id().await.is_none());
}

#[tokio::test]
async fn lost_seat_is_purged_from_the_usage_cache() {
    let dir = TempDir::new().unwrap();
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/acquire"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "sessionId": "sess-gone",
            "seatsUsed": 2,
            "seatsAvailable": 1,
        })))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "reason": "session expired",
        })))
        .mount(&mock)
        .await;

    let (client, mut rx) = lease_client(
        &mock.uri(),
        dir.path(),
        SeatLeaseConfig {
            heartbeat_interval_secs: 1,
            session_timeout_minutes: 1,
        },
    );

    client.acquire_seat().await.unwrap();
    wait_for_event(&mut rx, Duration::from_secs(5), |e| {
        matches!(e, LicenseEvent::SeatLost { .. })
    })
    .await
    .unwrap();

    // Degraded status reads must not resurrect the dead session.
    let store = open_store(dir.path());
    let cache: SeatUsageCache = store.load(&LicenseId::from("LIC-SEATS-1"), RecordKind::Usage);
    assert!(cache.session_id.is_none());
    assert_eq!(cache.seats_used, 0);
}

#[tokio::test]
async fn heartbeat_network_failure_does_not_lose_the_seat() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/acquire"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "sessionId": "sess-flaky",
            "seatsUsed": 1,
            "seatsAvailable": 0,
        })))
        .mount(&mock)
        .await;
    // The server accepts the connection but errors out: no verdict.
    Mock::given(method("POST"))
        .and(path("/api/license/seats/heartbeat"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock)
        .await;

    let (client, mut rx) = lease_client(
        &mock.uri(),
        dir.path(),
        SeatLeaseConfig {
            heartbeat_interval_secs: 1,
            session_timeout_minutes: 1,
        },
    );

    client.acquire_seat().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(
        drain_events(&mut rx)
            .iter()
            .all(|e| !matches!(e, LicenseEvent::SeatLost { .. })),
        "transient failures must not evict the seat"
    );
    assert_eq!(client.session_id().await.as_deref(), Some("sess-flaky"));
}

// ── Release ─────────────────────────────────────────────────────

#[tokio::test]
async fn release_notifies_server_and_clears_session() {
    let dir = TempDir::new().unwrap();
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/acquire"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "sessionId": "sess-rel",
            "seatsUsed": 1,
            "seatsAvailable": 2,
        })))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/release"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock)
        .await;

    let (client, _rx) = lease_client(&mock.uri(), dir.path(), SeatLeaseConfig::default());

    client.acquire_seat().await.unwrap();
    client.release_seat().await.unwrap();
    assert!(client.session_id().await.is_none());
}

#[tokio::test]
async fn release_clears_session_even_if_server_unreachable() {
    let dir = TempDir::new().unwrap();
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/acquire"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "sessionId": "sess-stuck",
            "seatsUsed": 1,
            "seatsAvailable": 2,
        })))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/release"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock)
        .await;

    let (client, _rx) = lease_client(&mock.uri(), dir.path(), SeatLeaseConfig::default());

    client.acquire_seat().await.unwrap();
    client.release_seat().await.unwrap();
    assert!(
        client.session_id().await.is_none(),
        "local state must never hold a phantom seat"
    );
}

#[tokio::test]
async fn release_without_session_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let (client, _rx) = lease_client(
        "http://127.0.0.1:1",
        dir.path(),
        SeatLeaseConfig::default(),
    );
    client.release_seat().await.unwrap();
}

#[tokio::test]
async fn force_release_needs_no_local_session() {
    let dir = TempDir::new().unwrap();
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/force-release"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock)
        .await;

    let (client, _rx) = lease_client(&mock.uri(), dir.path(), SeatLeaseConfig::default());
    client.force_release_session("someone-elses-session").await.unwrap();
}

// ── Status queries ──────────────────────────────────────────────

#[tokio::test]
async fn seat_status_reports_server_view() {
    let dir = TempDir::new().unwrap();
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/license/seats/status"))
        .and(query_param("licenseId", "LIC-SEATS-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "maxSeats": 3,
            "seatsUsed": 2,
            "activeSessions": [session_json("a"), session_json("b")],
        })))
        .mount(&mock)
        .await;

    let (client, _rx) = lease_client(&mock.uri(), dir.path(), SeatLeaseConfig::default());

    let status = client.seat_status().await;
    assert!(status.server_reachable);
    assert_eq!(status.max_seats, Some(3));
    assert_eq!(status.seats_used, Some(2));
    assert_eq!(status.active_sessions.len(), 2);
}

#[tokio::test]
async fn seat_status_degrades_to_cache_when_unreachable() {
    let dir = TempDir::new().unwrap();
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/license/seats/acquire"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "sessionId": "sess-cache",
            "seatsUsed": 2,
            "seatsAvailable": 1,
        })))
        .mount(&mock)
        .await;

    // Acquire through the mock to populate the usage cache.
    let (client, _rx) = lease_client(&mock.uri(), dir.path(), SeatLeaseConfig::default());
    client.acquire_seat().await.unwrap();
    drop(client);

    // Same store, dead server: the answer comes from the cache.
    let (client, _rx) = lease_client(
        "http://127.0.0.1:1",
        dir.path(),
        SeatLeaseConfig::default(),
    );
    let status = client.seat_status().await;
    assert!(!status.server_reachable);
    assert_eq!(status.seats_used, Some(2));
    assert!(status.active_sessions.is_empty());
}

#[tokio::test]
async fn active_sessions_report_server_list() {
    let dir = TempDir::new().unwrap();
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/license/seats/sessions"))
        .and(query_param("licenseId", "LIC-SEATS-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([session_json("a"), session_json("b")])),
        )
        .mount(&mock)
        .await;

    let (client, _rx) = lease_client(&mock.uri(), dir.path(), SeatLeaseConfig::default());

    let sessions = client.active_sessions().await;
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].session_id, "a");
    assert_eq!(sessions[1].machine_name, "machine-b");
}

#[tokio::test]
async fn active_sessions_degrade_to_empty_when_unreachable() {
    let dir = TempDir::new().unwrap();
    let (client, _rx) = lease_client(
        "http://127.0.0.1:1",
        dir.path(),
        SeatLeaseConfig::default(),
    );
    assert!(client.active_sessions().await.is_empty());
}
