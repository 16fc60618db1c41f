//! Shared test helpers for license runtime tests.

#![allow(dead_code)]

use fieldmark_crypto::{CryptoResult, KdfParams, SecretStore};
use fieldmark_license::{
    EventBus, LicenseEvent, SecureStateStore, ServerConfig, StoreConfig,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Deterministic secret backend so stores are reproducible across instances.
pub struct FixedSecret;

impl SecretStore for FixedSecret {
    fn machine_secret(&self) -> CryptoResult<Vec<u8>> {
        Ok(b"fixed-test-machine-secret".to_vec())
    }
}

/// Store config rooted in a temp directory, mirror enabled.
pub fn store_config(root: &Path) -> StoreConfig {
    StoreConfig {
        data_dir: root.join("primary"),
        mirror_dir: Some(root.join("mirror")),
        entropy: b"test-entropy".to_vec(),
    }
}

/// Opens a test store with fast KDF parameters.
pub fn open_store(root: &Path) -> Arc<SecureStateStore> {
    Arc::new(
        SecureStateStore::open_with_secret(
            &store_config(root),
            &FixedSecret,
            &KdfParams::fast_insecure(),
        )
        .unwrap(),
    )
}

/// Server config pointing at a mock server.
pub fn server_config(base_url: &str) -> ServerConfig {
    ServerConfig {
        base_url: base_url.to_string(),
        request_timeout_secs: 5,
    }
}

/// Drains everything currently buffered on an event receiver.
pub fn drain_events(rx: &mut broadcast::Receiver<LicenseEvent>) -> Vec<LicenseEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Waits up to `timeout` for an event matching `pred`.
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<LicenseEvent>,
    timeout: std::time::Duration,
    mut pred: F,
) -> Option<LicenseEvent>
where
    F: FnMut(&LicenseEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) if pred(&event) => return Some(event),
            Ok(Ok(_)) => continue,
            _ => return None,
        }
    }
}

/// Installs a test tracing subscriber; idempotent across tests.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fresh event bus plus a subscribed receiver.
pub fn bus_with_subscriber() -> (EventBus, broadcast::Receiver<LicenseEvent>) {
    let bus = EventBus::new();
    let rx = bus.subscribe();
    (bus, rx)
}
