//! Application bootstrap through `BusHost`: declarations made before
//! startup, the shared accessor, shutdown, and configuration loaded from
//! disk.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use beacon_bus::prelude::*;
use beacon_bus::{ConfigError, config, handler_set};
use serde_json::{Value, json};

static SIGNUPS: AtomicUsize = AtomicUsize::new(0);
static WELCOMES: AtomicUsize = AtomicUsize::new(0);

fn count_signup(payload: &Value) -> anyhow::Result<()> {
    anyhow::ensure!(payload.get("email").is_some(), "signup without email");
    SIGNUPS.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

async fn send_welcome(payload: Arc<Value>) -> anyhow::Result<()> {
    tokio::task::yield_now().await;
    anyhow::ensure!(payload["email"].is_string(), "email must be a string");
    WELCOMES.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

#[tokio::test]
async fn declared_handlers_are_live_after_startup() {
    let host = BusHost::default();

    host.declare(handler_set! {
        "user.created" => blocking count_signup,
        "user.created" => suspending send_welcome,
    })
    .unwrap();
    assert!(matches!(host.bus(), Err(BusError::NotInitialized)));

    let bus = host.on_start().unwrap();
    let names: Vec<_> = bus
        .handlers_for("user.created")
        .iter()
        .map(|entry| entry.handler.name().to_string())
        .collect();
    assert_eq!(names, vec!["count_signup", "send_welcome"]);

    // A component that only has the host sees the same bus.
    host.bus()
        .unwrap()
        .emit("user.created", json!({"email": "ada@example.com"}))
        .await
        .unwrap();

    assert_eq!(SIGNUPS.load(Ordering::SeqCst), 1);
    assert_eq!(WELCOMES.load(Ordering::SeqCst), 1);

    let err = bus.emit("user.created", json!({})).await.unwrap_err();
    assert_eq!(err.failures().len(), 2);

    assert!(host.on_stop());
}

#[tokio::test]
async fn shutdown_clears_handlers_and_rejects_restart() {
    let host = BusHost::default();
    let bus = host.on_start().unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    host.declare(HandlerSet::new().on("tick", "count", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }))
    .unwrap();

    bus.emit("tick", json!(null)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(host.on_stop());
    assert_eq!(host.status(), HostStatus::Stopped);
    assert_eq!(bus.handler_count(), 0);
    assert!(matches!(bus.emit("tick", json!(null)).await, Err(BusError::BusStopped)));
    assert!(matches!(host.on_start(), Err(BusError::BusStopped)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn host_builds_bus_from_loaded_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "dispatch_mode = \"concurrent\"").unwrap();
    writeln!(file, "max_handlers_per_event = 2").unwrap();

    let loaded = BusConfig::load_file(file.path()).unwrap();
    assert!(loaded.catch_panics, "unset keys keep their defaults");

    let host = BusHost::new(loaded);
    host.declare(
        HandlerSet::new()
            .on("x", "one", |_| Ok(()))
            .on("x", "two", |_| Ok(())),
    )
    .unwrap();

    let bus = host.on_start().unwrap();
    assert_eq!(bus.config().dispatch_mode, DispatchMode::Concurrent);

    let err = bus.on("x", "three", |_| Ok(())).unwrap_err();
    assert!(matches!(err, BusError::HandlerLimitReached { limit: 2, .. }));
}

#[test]
fn environment_overrides_win_over_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "catch_panics = true").unwrap();

    let vars: HashMap<_, _> = [("BEACON_CATCH_PANICS".to_string(), "false".to_string())]
        .into_iter()
        .collect();
    let loaded = config::load_with_env(Some(file.path()), &vars).unwrap();

    assert!(!loaded.catch_panics);
    assert_eq!(loaded.dispatch_mode, DispatchMode::Sequential);
}

#[test]
fn malformed_config_is_reported_with_its_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "dispatch_mode = [").unwrap();

    let err = BusConfig::load_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { .. }));
    assert!(err.to_string().contains(&file.path().display().to_string()));
}
