//! Knowledge graph over the tool surface: rate limit, severity gating,
//! search, similarity, and status transitions.

use serde_json::{json, Value};

mod common;
use common::*;

fn store_args(agent: &str, summary: &str, severity: &str) -> Value {
    json!({
        "agent_id": agent,
        "type": "insight",
        "summary": summary,
        "details": "details",
        "severity": severity,
        "tags": ["testing"],
    })
}

#[tokio::test]
async fn eleventh_store_in_the_window_is_rate_limited() {
    let (_dir, runtime) = make_runtime();
    register(&runtime, "eps").await;

    for n in 0..10 {
        let stored = runtime
            .dispatch(
                "store_knowledge_graph",
                store_args("eps", &format!("observation {n}"), "low"),
            )
            .await;
        assert_success(&stored);
    }

    let eleventh = runtime
        .dispatch(
            "store_knowledge_graph",
            store_args("eps", "one too many", "low"),
        )
        .await;
    assert_error_code(&eleventh, "RATE_LIMITED");
    // The rejection carries a reset hint.
    assert!(eleventh["recovery"]["action"]
        .as_str()
        .unwrap()
        .contains("Retry after"));
}

#[tokio::test]
async fn high_severity_requires_an_authenticated_author() {
    let (_dir, runtime) = make_runtime();
    let key = register(&runtime, "author").await;

    // Anonymous (or keyless) callers may only file low/medium.
    let denied = runtime
        .dispatch(
            "store_knowledge_graph",
            store_args("author", "production data loss", "critical"),
        )
        .await;
    assert_error_code(&denied, "AUTH_FAILED");

    let mut args = store_args("author", "production data loss", "critical");
    args["api_key"] = json!(key);
    let stored = runtime.dispatch("store_knowledge_graph", args).await;
    assert_success(&stored);

    // Unregistered ids can still file low-severity observations.
    let anonymous = runtime
        .dispatch(
            "store_knowledge_graph",
            store_args("drive-by", "small nit", "low"),
        )
        .await;
    assert_success(&anonymous);
}

#[tokio::test]
async fn search_and_details_round_trip() {
    let (_dir, runtime) = make_runtime();
    register(&runtime, "author").await;

    let stored = runtime
        .dispatch(
            "store_knowledge_graph",
            json!({
                "agent_id": "author",
                "type": "bug_found",
                "summary": "Flush loses the trailing page",
                "details": "Only under concurrent checkpoints.",
                "severity": "high",
                "api_key": register(&runtime, "author2").await, // wrong agent's key
            }),
        )
        .await;
    // Key mismatch for high severity is refused.
    assert_error_code(&stored, "AUTH_FAILED");

    let stored = runtime
        .dispatch(
            "store_knowledge_graph",
            json!({
                "agent_id": "author",
                "type": "bug_found",
                "summary": "Flush loses the trailing page",
                "details": "Only under concurrent checkpoints.",
                "severity": "medium",
                "tags": ["storage", "flush"],
            }),
        )
        .await;
    assert_success(&stored);
    let id = stored["discovery_id"].as_str().unwrap();

    let hits = runtime
        .dispatch(
            "search_knowledge_graph",
            json!({"tags": ["storage"], "text": "trailing"}),
        )
        .await;
    assert_success(&hits);
    assert_eq!(hits["count"], json!(1));
    assert_eq!(hits["discoveries"][0]["id"], json!(id));

    let details = runtime
        .dispatch("get_discovery_details", json!({"discovery_id": id}))
        .await;
    assert_success(&details);
    assert_eq!(details["discovery"]["type"], json!("bug_found"));

    let missing = runtime
        .dispatch("get_discovery_details", json!({"discovery_id": "d0000"}))
        .await;
    assert_error_code(&missing, "NOT_FOUND");
}

#[tokio::test]
async fn find_similar_scores_overlapping_summaries() {
    let (_dir, runtime) = make_runtime();
    register(&runtime, "author").await;

    let stored = runtime
        .dispatch(
            "store_knowledge_graph",
            store_args("author", "cache invalidation misses the index shard", "low"),
        )
        .await;
    assert_success(&stored);

    let similar = runtime
        .dispatch(
            "find_similar_discoveries_graph",
            json!({
                "summary": "index shard misses after cache invalidation",
                "tags": ["testing"],
                "threshold": 0.3,
            }),
        )
        .await;
    assert_success(&similar);
    assert!(similar["count"].as_u64().unwrap() >= 1);
    assert!(similar["matches"][0]["score"].as_f64().unwrap() >= 0.3);

    let unrelated = runtime
        .dispatch(
            "find_similar_discoveries_graph",
            json!({"summary": "entirely different topic", "threshold": 0.5}),
        )
        .await;
    assert_eq!(unrelated["count"], json!(0));
}

#[tokio::test]
async fn status_updates_are_idempotent_and_validated() {
    let (_dir, runtime) = make_runtime();
    register(&runtime, "author").await;

    let stored = runtime
        .dispatch(
            "store_knowledge_graph",
            store_args("author", "finding under review", "low"),
        )
        .await;
    let id = stored["discovery_id"].as_str().unwrap().to_string();

    let resolved = runtime
        .dispatch(
            "update_discovery_status_graph",
            json!({"discovery_id": id, "status": "resolved", "resolution_note": "fixed"}),
        )
        .await;
    assert_success(&resolved);
    assert_eq!(resolved["discovery"]["status"], json!("resolved"));

    // Same status again: no error, same outcome.
    let again = runtime
        .dispatch(
            "update_discovery_status_graph",
            json!({"discovery_id": id, "status": "resolved"}),
        )
        .await;
    assert_success(&again);
    assert_eq!(again["discovery"]["resolution_note"], json!("fixed"));

    // Disputing without a session is rejected; with a bogus session too.
    let no_session = runtime
        .dispatch(
            "update_discovery_status_graph",
            json!({"discovery_id": id, "status": "disputed"}),
        )
        .await;
    assert_error_code(&no_session, "VALIDATION");

    let bogus = runtime
        .dispatch(
            "update_discovery_status_graph",
            json!({"discovery_id": id, "status": "disputed", "session_id": "nope"}),
        )
        .await;
    assert_error_code(&bogus, "NOT_FOUND");
}

#[tokio::test]
async fn relevant_discoveries_surface_in_update_responses() {
    let (_dir, runtime) = make_runtime();
    let scout_key = register(&runtime, "scout").await;
    let worker_key = register(&runtime, "worker").await;

    let stored = runtime
        .dispatch(
            "store_knowledge_graph",
            json!({
                "agent_id": "scout",
                "api_key": scout_key,
                "type": "pattern",
                "summary": "deadlock between metadata and agent locks",
                "details": "Acquire metadata first, always.",
                "severity": "medium",
                "tags": ["deadlock", "locking"],
            }),
        )
        .await;
    assert_success(&stored);

    let response = update(
        &runtime,
        "worker",
        &worker_key,
        "Investigating a possible deadlock in the locking layer",
        0.2,
    )
    .await;
    assert_success(&response);
    let surfaced = response["surfaced_discoveries"].as_array().unwrap();
    assert!(!surfaced.is_empty(), "nothing surfaced: {response}");
    assert_eq!(surfaced[0]["discovery"]["agent_id"], json!("scout"));
    assert!(surfaced.len() <= 3);
}
