//! Shared helpers for the integration tests
#![allow(dead_code)]

use serde_json::{json, Value};
use tempfile::TempDir;

use govmon_runtime::{GovernanceRuntime, RuntimeConfig};

/// Runtime over a fresh temp data directory with a short save debounce.
pub fn make_runtime() -> (TempDir, GovernanceRuntime) {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = RuntimeConfig::default();
    config.storage.data_dir = dir.path().join("data");
    config.persistence.metadata_debounce = std::time::Duration::from_millis(20);
    let runtime = GovernanceRuntime::new(config).expect("runtime init");
    (dir, runtime)
}

/// Reopen a runtime over an existing data directory (restart simulation).
pub fn reopen_runtime(dir: &TempDir) -> GovernanceRuntime {
    let mut config = RuntimeConfig::default();
    config.storage.data_dir = dir.path().join("data");
    GovernanceRuntime::new(config).expect("runtime reopen")
}

/// Register an agent and return its API key.
pub async fn register(runtime: &GovernanceRuntime, agent_id: &str) -> String {
    let response = runtime
        .dispatch("get_agent_api_key", json!({ "agent_id": agent_id }))
        .await;
    assert_eq!(
        response.get("success").and_then(Value::as_bool),
        Some(true),
        "registration failed: {response}"
    );
    assert_eq!(response["is_new"], json!(true));
    response["api_key"].as_str().expect("api key").to_string()
}

/// Submit one update with the standard arguments.
pub async fn update(
    runtime: &GovernanceRuntime,
    agent_id: &str,
    api_key: &str,
    text: &str,
    complexity: f64,
) -> Value {
    runtime
        .dispatch(
            "process_agent_update",
            json!({
                "agent_id": agent_id,
                "api_key": api_key,
                "response_text": text,
                "complexity": complexity,
            }),
        )
        .await
}

/// Space calls out so the rapid-fire loop pattern stays quiet.
pub async fn pace() {
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
}

pub fn assert_success(response: &Value) {
    assert_eq!(
        response.get("success").and_then(Value::as_bool),
        Some(true),
        "expected success: {response}"
    );
}

pub fn assert_error_code(response: &Value, code: &str) {
    assert_eq!(
        response.get("success").and_then(Value::as_bool),
        Some(false),
        "expected failure: {response}"
    );
    assert_eq!(
        response.get("error_code").and_then(Value::as_str),
        Some(code),
        "wrong error code: {response}"
    );
}
