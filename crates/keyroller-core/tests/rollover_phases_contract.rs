//! Contract: rollover phase ordering
//!
//! Walks one zone through a complete pre-publish ZSK rollover and
//! verifies:
//! - Phases advance strictly through the cycle
//!   Idle -> Submitted -> AwaitingPropagation -> Finalized -> Idle
//! - A due check whose precondition has not been met holds the phase
//!   instead of advancing
//! - Key material on the server matches the phase at every step

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::*;
use keyroller_core::{EngineEvent, ManagementApi, MemoryStateStore, RollPhase, RollerEngine};

#[tokio::test]
async fn full_rollover_cycle() {
    let server = FakeKeyServer::new();
    let old_key = server.seed_active_zsk("example.com");
    server.hold_publication();

    let (mut engine, mut events) = RollerEngine::new(
        Box::new(server.clone()),
        Box::new(MemoryStateStore::new()),
        test_config(&["example.com"]),
        None,
    )
    .await
    .unwrap();

    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

    // T0: idle zone with an active key submits a pre-published successor
    engine.poll_once(t0).await;
    let status = engine.state().get("example.com").unwrap().clone();
    assert_eq!(status.phase, RollPhase::Submitted);
    assert_eq!(status.retired_key, Some(old_key));
    let new_key = status.pending_key.expect("pending key recorded");
    assert_eq!(server.keys_for("example.com").len(), 2);

    // Before the propagation delay elapses the zone is skipped entirely
    let calls = server.total_calls();
    engine.poll_once(t0 + Duration::seconds(100)).await;
    assert_eq!(server.total_calls(), calls);

    // T1: due again, but the server has not published the key yet; the
    // phase holds and the check is rescheduled
    let t1 = t0 + Duration::seconds(300);
    engine.poll_once(t1).await;
    let status = engine.state().get("example.com").unwrap();
    assert_eq!(status.phase, RollPhase::Submitted);
    assert_eq!(status.next_action, t1 + Duration::seconds(300));

    // T2: key is published now; advance to the TTL wait
    server.release_publication();
    let t2 = t1 + Duration::seconds(300);
    engine.poll_once(t2).await;
    let status = engine.state().get("example.com").unwrap();
    assert_eq!(status.phase, RollPhase::AwaitingPropagation);
    assert_eq!(status.next_action, t2 + Duration::seconds(600));

    // T3: activate the new key, retire the old one
    let t3 = t2 + Duration::seconds(600);
    engine.poll_once(t3).await;
    let status = engine.state().get("example.com").unwrap();
    assert_eq!(status.phase, RollPhase::Finalized);

    let keys = server.keys_for("example.com");
    let new = keys.iter().find(|k| k.id == new_key).unwrap();
    let old = keys.iter().find(|k| k.id == old_key).unwrap();
    assert!(new.active, "successor key must be signing");
    assert!(!old.active, "retired key must no longer sign");

    // T4: remove the retired key and rest until the next rotation
    let t4 = t3 + Duration::seconds(600);
    engine.poll_once(t4).await;
    let status = engine.state().get("example.com").unwrap();
    assert_eq!(status.phase, RollPhase::Idle);
    assert_eq!(status.next_action, t4 + Duration::seconds(86400));
    assert!(status.pending_key.is_none());
    assert!(status.retired_key.is_none());

    let keys = server.keys_for("example.com");
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].id, new_key);

    // The emitted events tell the same story
    let mut phase_events = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::PhaseAdvanced { from, to, .. } => phase_events.push((from, to)),
            EngineEvent::PhaseHeld { phase, .. } => phase_events.push((phase, phase)),
            _ => {}
        }
    }
    assert_eq!(
        phase_events,
        vec![
            (RollPhase::Idle, RollPhase::Submitted),
            (RollPhase::Submitted, RollPhase::Submitted),
            (RollPhase::Submitted, RollPhase::AwaitingPropagation),
            (RollPhase::AwaitingPropagation, RollPhase::Finalized),
            (RollPhase::Finalized, RollPhase::Idle),
        ]
    );
}

#[tokio::test]
async fn vanished_pending_key_is_a_handler_error_not_a_phase_skip() {
    let server = FakeKeyServer::new();
    server.seed_active_zsk("example.com");

    let (mut engine, _events) = RollerEngine::new(
        Box::new(server.clone()),
        Box::new(MemoryStateStore::new()),
        test_config(&["example.com"]),
        None,
    )
    .await
    .unwrap();

    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    engine.poll_once(t0).await;
    let pending = engine
        .state()
        .get("example.com")
        .unwrap()
        .pending_key
        .unwrap();

    // Someone deleted the submitted key behind the roller's back
    server.delete_key("example.com", pending).await.unwrap();

    let t1 = t0 + Duration::seconds(300);
    engine.poll_once(t1).await;

    let status = engine.state().get("example.com").unwrap();
    assert_eq!(status.phase, RollPhase::Submitted, "phase must not change");
    assert!(status.last_error.is_some());
    assert!(status.next_action > t1, "zone must be backed off");
}
