//! Contract: shutdown persists state
//!
//! Constraints verified:
//! - The run loop persists the state snapshot before exiting on a
//!   shutdown signal, so schedule updates from the final tick survive
//! - Zone failures never terminate the loop; only the shutdown signal does

mod common;

use common::*;
use keyroller_core::{MemoryStateStore, RollPhase, RollerEngine, StateStore};

#[tokio::test]
async fn shutdown_persists_state_before_exit() {
    let server = FakeKeyServer::new();
    server.seed_active_zsk("example.com");
    let store = MemoryStateStore::new();

    let (mut engine, _events) = RollerEngine::new(
        Box::new(server),
        Box::new(store.clone()),
        test_config(&["example.com"]),
        None,
    )
    .await
    .unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let handle = tokio::spawn(async move {
        let result = engine.run_with_shutdown(Some(shutdown_rx)).await;
        (engine, result)
    });

    // Let the first (immediate) tick run
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    shutdown_tx.send(()).unwrap();
    let (engine, result) = handle.await.unwrap();
    result.expect("clean shutdown");

    // The persisted snapshot matches the in-memory state at exit
    let persisted = store.load().await.unwrap();
    assert_eq!(&persisted, engine.state());

    let status = persisted.get("example.com").expect("zone was processed");
    assert_eq!(status.phase, RollPhase::Submitted);
}

#[tokio::test]
async fn zone_failures_do_not_terminate_the_loop() {
    let server = FakeKeyServer::new();
    server.seed_active_zsk("example.com");
    server.fail_zone("example.com");
    let store = MemoryStateStore::new();

    let (mut engine, _events) = RollerEngine::new(
        Box::new(server),
        Box::new(store.clone()),
        test_config(&["example.com"]),
        None,
    )
    .await
    .unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let handle = tokio::spawn(async move {
        let result = engine.run_with_shutdown(Some(shutdown_rx)).await;
        (engine, result)
    });

    tokio::time::sleep(tokio::time::Duration::from_millis(150)).await;

    // Still running despite the failing zone; shut down cleanly
    assert!(!handle.is_finished());
    shutdown_tx.send(()).unwrap();
    let (_engine, result) = handle.await.unwrap();
    result.expect("failures must not become fatal");

    let persisted = store.load().await.unwrap();
    let status = persisted.get("example.com").expect("failure was recorded");
    assert!(status.last_error.is_some());
}
