//! Loop detection and cooldown behaviour over the tool surface

use serde_json::{json, Value};
use serial_test::serial;

use govmon_runtime::ThermoState;

mod common;
use common::*;

// The rapid-fire window is 0.3s of wall clock; these tests run serially
// so a loaded test host cannot stretch the gap between two dispatches.

#[tokio::test]
#[serial]
async fn rapid_fire_updates_hit_a_cooldown() {
    let (dir, runtime) = make_runtime();
    let key = register(&runtime, "gamma").await;

    let first = update(&runtime, "gamma", &key, "quick one", 0.1).await;
    assert_success(&first);

    // Immediately again: well inside the 0.3s rapid-fire window.
    let second = update(&runtime, "gamma", &key, "quick two", 0.1).await;
    assert_error_code(&second, "LOOP_COOLDOWN");

    // The rejection discloses the remaining cooldown.
    let action = second["recovery"]["action"].as_str().unwrap();
    assert!(action.contains("Wait"), "no remaining-time hint: {second}");
    let remaining: f64 = second["error"]
        .as_str()
        .unwrap()
        .split("cooldown for ")
        .nth(1)
        .and_then(|s| s.strip_suffix('s'))
        .and_then(|s| s.parse().ok())
        .expect("remaining seconds in message");
    assert!(remaining <= 5.0);

    // No second history entry was written.
    let raw =
        std::fs::read_to_string(dir.path().join("data/agents/gamma_state.json")).unwrap();
    let state: ThermoState = serde_json::from_str(&raw).unwrap();
    assert_eq!(state.update_count, 1);
    assert_eq!(state.history.len(), 1);
}

#[tokio::test]
#[serial]
async fn cooldown_blocks_until_it_expires() {
    let (_dir, runtime) = make_runtime();
    let key = register(&runtime, "gamma").await;

    assert_success(&update(&runtime, "gamma", &key, "one", 0.1).await);
    assert_error_code(
        &update(&runtime, "gamma", &key, "two", 0.1).await,
        "LOOP_COOLDOWN",
    );

    // Still inside the 5s cooldown even though the rapid-fire window has
    // passed.
    tokio::time::sleep(std::time::Duration::from_millis(600)).await;
    let still_blocked = update(&runtime, "gamma", &key, "three", 0.1).await;
    assert_error_code(&still_blocked, "LOOP_COOLDOWN");
}

#[tokio::test]
#[serial]
async fn cooldown_state_is_persisted() {
    let (dir, runtime) = make_runtime();
    let key = register(&runtime, "gamma").await;

    assert_success(&update(&runtime, "gamma", &key, "one", 0.1).await);
    assert_error_code(
        &update(&runtime, "gamma", &key, "two", 0.1).await,
        "LOOP_COOLDOWN",
    );

    // A freshly loaded runtime still honours the cooldown.
    runtime.shutdown().unwrap();
    drop(runtime);
    let reopened = reopen_runtime(&dir);
    let blocked = update(&reopened, "gamma", &key, "three", 0.1).await;
    assert_error_code(&blocked, "LOOP_COOLDOWN");
}

#[tokio::test]
async fn spaced_updates_never_trip_the_detector() {
    let (_dir, runtime) = make_runtime();
    let key = register(&runtime, "steady").await;

    for n in 0..5 {
        pace().await;
        let response = update(&runtime, "steady", &key, &format!("step {n}"), 0.1).await;
        assert_success(&response);
    }

    let meta = runtime
        .dispatch("get_agent_metadata", json!({"agent_id": "steady"}))
        .await;
    assert_success(&meta);
    assert!(meta["agent"]["loop_cooldown_until"].is_null() || {
        // Field may be absent entirely.
        !meta["agent"]
            .as_object()
            .unwrap()
            .contains_key("loop_cooldown_until")
    });
    assert_eq!(meta["agent"]["total_updates"], json!(5));
}

#[tokio::test]
#[serial]
async fn rejected_updates_do_not_appear_in_rings() {
    let (_dir, runtime) = make_runtime();
    let key = register(&runtime, "gamma").await;

    assert_success(&update(&runtime, "gamma", &key, "one", 0.1).await);
    for _ in 0..3 {
        let rejected = update(&runtime, "gamma", &key, "burst", 0.1).await;
        assert_eq!(rejected["success"], Value::Bool(false));
    }

    let meta = runtime
        .dispatch("get_agent_metadata", json!({"agent_id": "gamma"}))
        .await;
    assert_eq!(
        meta["agent"]["recent_update_timestamps"]
            .as_array()
            .unwrap()
            .len(),
        1
    );
    assert_eq!(meta["agent"]["total_updates"], json!(1));
}
