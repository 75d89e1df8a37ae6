//! Pause, dialectic recovery, disputes, and tier-1 resume

use serde_json::{json, Value};

mod common;
use common::*;

/// Drive an agent into a pause: lower the void threshold, then send two
/// drifted updates so V moves off zero.
async fn pause_agent(runtime: &govmon_runtime::GovernanceRuntime, id: &str, key: &str) {
    let tightened = runtime
        .dispatch(
            "set_thresholds",
            json!({"agent_id": id, "api_key": key, "void_threshold": 0.0001}),
        )
        .await;
    assert_success(&tightened);

    let drift_args = |text: &str| {
        json!({
            "agent_id": id,
            "api_key": key,
            "response_text": text,
            "complexity": 0.5,
            "drift": [5.0, 5.0, 5.0],
        })
    };
    let first = runtime
        .dispatch("process_agent_update", drift_args("drifting hard"))
        .await;
    assert_success(&first);
    pace().await;
    let second = runtime
        .dispatch("process_agent_update", drift_args("still drifting"))
        .await;
    assert_success(&second);
    assert_eq!(second["decision"]["action"], json!("pause"), "{second}");
    assert_eq!(second["decision"]["verdict"], json!("high-risk"));
    assert_eq!(second["dialectic_available"], json!(true));

    let meta = runtime
        .dispatch("get_agent_metadata", json!({"agent_id": id}))
        .await;
    assert_eq!(meta["agent"]["status"], json!("paused"));
    assert!(meta["agent"]["paused_at"].is_string());
}

#[tokio::test]
async fn pause_and_full_dialectic_recovery() {
    let (_dir, runtime) = make_runtime();
    let delta_key = register(&runtime, "delta").await;
    let sage_key = register(&runtime, "sage").await;

    pause_agent(&runtime, "delta", &delta_key).await;

    // Paused agents cannot push updates.
    pace().await;
    let rejected = update(&runtime, "delta", &delta_key, "let me back in", 0.1).await;
    assert_error_code(&rejected, "STATE_VIOLATION");

    let opened = runtime
        .dispatch(
            "request_dialectic_review",
            json!({"agent_id": "delta", "api_key": delta_key, "reason": "test recovery"}),
        )
        .await;
    assert_success(&opened);
    assert_eq!(opened["self_recovery"], json!(false));
    assert_eq!(opened["session"]["reviewer_agent_id"], json!("sage"));
    let session_id = opened["session"]["session_id"].as_str().unwrap().to_string();

    let thesis = runtime
        .dispatch(
            "submit_thesis",
            json!({
                "agent_id": "delta",
                "api_key": delta_key,
                "session_id": session_id,
                "thesis": "External drift spiked; my own reasoning stayed on track.",
            }),
        )
        .await;
    assert_success(&thesis);
    assert_eq!(thesis["session"]["state"], json!("awaiting_antithesis"));

    let antithesis = runtime
        .dispatch(
            "submit_antithesis",
            json!({
                "agent_id": "sage",
                "api_key": sage_key,
                "session_id": session_id,
                "antithesis": "Metrics support a transient drift; entropy already easing.",
            }),
        )
        .await;
    assert_success(&antithesis);
    assert_eq!(antithesis["session"]["state"], json!("negotiating"));

    let synthesis = runtime
        .dispatch(
            "submit_synthesis",
            json!({
                "agent_id": "sage",
                "api_key": sage_key,
                "session_id": session_id,
                "synthesis": "Resume with smaller steps.",
                "agrees": true,
                "conditions": ["cap complexity at 0.5", "be excellent to each other"],
                "notes": "agreed resume",
            }),
        )
        .await;
    assert_success(&synthesis);
    assert_eq!(synthesis["session"]["state"], json!("resolved"));
    assert_eq!(
        synthesis["session"]["resolution"]["action"],
        json!("resume")
    );

    // The paused agent is active again with a lifecycle event naming the
    // session; the unknown condition was stored verbatim.
    let meta = runtime
        .dispatch("get_agent_metadata", json!({"agent_id": "delta"}))
        .await;
    assert_eq!(meta["agent"]["status"], json!("active"));
    assert!(meta["agent"]["paused_at"].is_null());
    let events = meta["agent"]["lifecycle_events"].as_array().unwrap();
    assert!(
        events.iter().any(|e| {
            e["event"]
                .as_str()
                .is_some_and(|ev| ev.contains(&format!("dialectic {session_id}")))
        }),
        "no lifecycle event names the session: {events:?}"
    );
    assert!(events.iter().any(|e| e["event"] == json!("unenforced condition")));
    let tags = meta["agent"]["tags"].as_array().unwrap();
    assert!(tags.contains(&json!("complexity-cap:0.5")));

    // And it can process updates again.
    pace().await;
    let back = update(&runtime, "delta", &delta_key, "small careful step", 0.1).await;
    assert_success(&back);
}

#[tokio::test]
async fn no_reviewer_promotes_self_recovery() {
    let (_dir, runtime) = make_runtime();
    let key = register(&runtime, "loner").await;
    pause_agent(&runtime, "loner", &key).await;

    let opened = runtime
        .dispatch(
            "request_dialectic_review",
            json!({"agent_id": "loner", "api_key": key, "reason": "nobody else is around"}),
        )
        .await;
    assert_success(&opened);
    assert_eq!(opened["self_recovery"], json!(true));
    let session_id = opened["session"]["session_id"].as_str().unwrap().to_string();

    // Thesis triggers the generated antithesis and goes straight to
    // negotiating.
    let thesis = runtime
        .dispatch(
            "submit_thesis",
            json!({
                "agent_id": "loner",
                "api_key": key,
                "session_id": session_id,
                "thesis": "Drift input overwhelmed the window; workload itself was fine.",
            }),
        )
        .await;
    assert_success(&thesis);
    assert_eq!(thesis["session"]["state"], json!("negotiating"));
    assert!(thesis["generated_antithesis"].as_str().unwrap().contains("coherence"));

    let synthesis = runtime
        .dispatch(
            "submit_synthesis",
            json!({
                "agent_id": "loner",
                "api_key": key,
                "session_id": session_id,
                "synthesis": "Will keep steps small and drift-free.",
                "agrees": true,
            }),
        )
        .await;
    assert_success(&synthesis);
    assert_eq!(synthesis["session"]["state"], json!("resolved"));

    let meta = runtime
        .dispatch("get_agent_metadata", json!({"agent_id": "loner"}))
        .await;
    assert_eq!(meta["agent"]["status"], json!("active"));
}

#[tokio::test]
async fn disagreement_to_exhaustion_blocks_and_agent_stays_paused() {
    let (_dir, runtime) = make_runtime();
    let key = register(&runtime, "stuck").await;
    let reviewer_key = register(&runtime, "judge").await;
    pause_agent(&runtime, "stuck", &key).await;

    let opened = runtime
        .dispatch(
            "request_dialectic_review",
            json!({"agent_id": "stuck", "api_key": key, "reason": "hard disagreement"}),
        )
        .await;
    let session_id = opened["session"]["session_id"].as_str().unwrap().to_string();

    runtime
        .dispatch(
            "submit_thesis",
            json!({"agent_id": "stuck", "api_key": key, "session_id": session_id, "thesis": "t"}),
        )
        .await;
    runtime
        .dispatch(
            "submit_antithesis",
            json!({"agent_id": "judge", "api_key": reviewer_key, "session_id": session_id, "antithesis": "a"}),
        )
        .await;

    let mut last = Value::Null;
    for round in 0..5 {
        last = runtime
            .dispatch(
                "submit_synthesis",
                json!({
                    "agent_id": "stuck",
                    "api_key": key,
                    "session_id": session_id,
                    "synthesis": format!("still disagree, round {round}"),
                    "agrees": false,
                }),
            )
            .await;
        assert_success(&last);
    }
    assert_eq!(last["session"]["state"], json!("blocked"));
    assert_eq!(last["terminal"], json!(true));

    let meta = runtime
        .dispatch("get_agent_metadata", json!({"agent_id": "stuck"}))
        .await;
    assert_eq!(meta["agent"]["status"], json!("paused"));
}

#[tokio::test]
async fn discovery_dispute_routes_to_the_author() {
    let (_dir, runtime) = make_runtime();
    let author_key = register(&runtime, "author").await;
    let challenger_key = register(&runtime, "challenger").await;

    let stored = runtime
        .dispatch(
            "store_knowledge_graph",
            json!({
                "agent_id": "author",
                "api_key": author_key,
                "type": "bug_found",
                "summary": "Index rebuild drops the last shard",
                "details": "Seen twice under load.",
                "severity": "medium",
                "tags": ["index"],
            }),
        )
        .await;
    assert_success(&stored);
    let discovery_id = stored["discovery_id"].as_str().unwrap().to_string();

    let opened = runtime
        .dispatch(
            "request_dialectic_review",
            json!({
                "agent_id": "challenger",
                "api_key": challenger_key,
                "reason": "cannot reproduce",
                "discovery_id": discovery_id,
                "dispute_type": "dispute",
            }),
        )
        .await;
    assert_success(&opened);
    assert_eq!(opened["session"]["reviewer_agent_id"], json!("author"));
    let session_id = opened["session"]["session_id"].as_str().unwrap().to_string();

    // The discovery is now disputed and linked to the session.
    let details = runtime
        .dispatch("get_discovery_details", json!({"discovery_id": discovery_id}))
        .await;
    assert_eq!(details["discovery"]["status"], json!("disputed"));
    assert_eq!(
        details["discovery"]["dispute_session_id"],
        json!(session_id)
    );

    runtime
        .dispatch(
            "submit_thesis",
            json!({
                "agent_id": "challenger",
                "api_key": challenger_key,
                "session_id": session_id,
                "thesis": "Reproduction steps fail on a clean checkout.",
            }),
        )
        .await;
    runtime
        .dispatch(
            "submit_antithesis",
            json!({
                "agent_id": "author",
                "api_key": author_key,
                "session_id": session_id,
                "antithesis": "The failure needs a populated cache first.",
            }),
        )
        .await;
    let resolved = runtime
        .dispatch(
            "submit_synthesis",
            json!({
                "agent_id": "author",
                "api_key": author_key,
                "session_id": session_id,
                "synthesis": "Cache precondition documented; finding stands as resolved.",
                "agrees": true,
            }),
        )
        .await;
    assert_success(&resolved);

    let details = runtime
        .dispatch("get_discovery_details", json!({"discovery_id": discovery_id}))
        .await;
    assert_eq!(details["discovery"]["status"], json!("resolved"));
    assert!(details["discovery"]["resolution_note"]
        .as_str()
        .unwrap()
        .contains(&session_id));
}

#[tokio::test]
async fn direct_resume_requires_safe_metrics() {
    let (_dir, runtime) = make_runtime();
    let key = register(&runtime, "delta").await;
    pause_agent(&runtime, "delta", &key).await;

    // The void threshold is still tightened, so the resume bar fails.
    let refused = runtime
        .dispatch(
            "direct_resume_if_safe",
            json!({"agent_id": "delta", "api_key": key}),
        )
        .await;
    assert_success(&refused);
    assert_eq!(refused["resumed"], json!(false));
    assert_eq!(refused["checks"]["void_ok"], json!(false));

    // Restore the default threshold; the metrics now clear the bar.
    let relaxed = runtime
        .dispatch(
            "set_thresholds",
            json!({"agent_id": "delta", "api_key": key, "void_threshold": 0.15}),
        )
        .await;
    assert_success(&relaxed);

    let resumed = runtime
        .dispatch(
            "direct_resume_if_safe",
            json!({"agent_id": "delta", "api_key": key}),
        )
        .await;
    assert_success(&resumed);
    assert_eq!(resumed["resumed"], json!(true));

    let meta = runtime
        .dispatch("get_agent_metadata", json!({"agent_id": "delta"}))
        .await;
    assert_eq!(meta["agent"]["status"], json!("active"));
}
