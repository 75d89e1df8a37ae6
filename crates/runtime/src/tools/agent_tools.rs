//! Agent lifecycle and update-processing handlers

use std::sync::Arc;

use serde_json::{json, Value};

use crate::dialectic::resolution::complexity_cap_from_tags;
use crate::registry::{ListFilters, NotesMode};
use crate::types::{
    time, AgentStatus, DecisionAction, RuntimeError, StateMachineError, ValidationError,
};

use super::{
    agent_id_arg, ok, opt_bool, opt_drift, opt_f64, opt_str, opt_str_list, opt_usize, req_str,
    ToolContext,
};

/// `get_agent_api_key` — registration and key rotation.
pub fn get_agent_api_key(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let force_new = opt_bool(&args, "force_new", false);
    let presented = opt_str(&args, "api_key");

    let (api_key, is_new) =
        ctx.registry
            .issue_api_key(&agent_id, force_new, presented.as_deref())?;
    ok(json!({
        "agent_id": agent_id,
        "api_key": api_key,
        "is_new": is_new,
        "note": "Store this key; it is returned exactly once.",
    }))
}

/// `process_agent_update` — the main governance entry point.
pub fn process_agent_update(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let text = req_str(&args, "response_text")?;
    let mut complexity = opt_f64(&args, "complexity");
    let drift = opt_drift(&args)?;
    let confidence = opt_f64(&args, "confidence");

    let now = time::now();
    let admission = ctx.registry.admit_update(&agent_id, now)?;
    let meta = ctx.registry.require(&agent_id)?;

    // A dialectic resolution may have imposed a complexity cap.
    if let (Some(reported), Some(cap)) = (complexity, complexity_cap_from_tags(&meta.tags)) {
        complexity = Some(reported.min(cap));
    }

    let thresholds = ctx.thresholds();
    let outcome = ctx.with_monitor(&agent_id, |monitor| {
        monitor.process_update(&text, complexity, drift, confidence, &thresholds)
    })?;

    let (update_count, health) = ctx.read_monitor(&agent_id, |monitor| {
        (monitor.state.update_count, monitor.health_status(&thresholds))
    })?;

    let paused = outcome.decision.action == DecisionAction::Pause;
    ctx.registry.commit_update(
        &agent_id,
        outcome.decision.action,
        now,
        update_count,
        paused.then(|| outcome.decision.reason.clone()),
    )?;

    let surfaced = ctx
        .graph
        .surface_relevant(agent_id.as_str(), &meta.tags, &text, 3);

    ok(json!({
        "agent_id": agent_id,
        "state": outcome.snapshot,
        "decision": outcome.decision,
        "attention": outcome.attention,
        "phi": outcome.phi,
        "risk_score": outcome.risk_score,
        "complexity_used": outcome.complexity_used,
        "health_status": health,
        "sampling_params": outcome.sampling_params,
        "surfaced_discoveries": surfaced,
        "auto_resumed": admission.auto_resumed,
        "status": if paused { AgentStatus::Paused } else { AgentStatus::Active },
        "dialectic_available": paused,
    }))
}

/// `get_governance_metrics` — current snapshot without processing.
pub fn get_governance_metrics(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let meta = ctx.registry.require(&agent_id)?;
    let thresholds = ctx.thresholds();
    let metrics = ctx.read_monitor(&agent_id, |monitor| monitor.metrics(&thresholds))?;

    ok(json!({
        "agent_id": agent_id,
        "status": meta.status,
        "metrics": metrics,
    }))
}

/// `simulate_update` — dry-run; repeated calls are equal and side-effect
/// free.
pub fn simulate_update(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let text = req_str(&args, "response_text")?;
    let complexity = opt_f64(&args, "complexity");
    let drift = opt_drift(&args)?;
    let confidence = opt_f64(&args, "confidence");

    ctx.registry.require(&agent_id)?;
    let thresholds = ctx.thresholds();
    let outcome = ctx.read_monitor(&agent_id, |monitor| {
        monitor.simulate(&text, complexity, drift, confidence, &thresholds)
    })??;

    ok(json!({
        "agent_id": agent_id,
        "state": outcome.snapshot,
        "decision": outcome.decision,
        "attention": outcome.attention,
        "risk_score": outcome.risk_score,
        "complexity_used": outcome.complexity_used,
        "simulated": true,
    }))
}

/// `list_agents` — filtered summaries, newest activity first.
pub fn list_agents(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let defaults = ListFilters::default();
    let status = match opt_str(&args, "status") {
        Some(raw) => Some(
            serde_json::from_value::<AgentStatus>(Value::String(raw.clone())).map_err(|_| {
                RuntimeError::from(ValidationError::Malformed(format!(
                    "unknown status filter: {raw}"
                )))
            })?,
        ),
        None => None,
    };
    let filters = ListFilters {
        recent_days: args
            .get("recent_days")
            .and_then(Value::as_i64)
            .or(defaults.recent_days),
        status,
        named_only: opt_bool(&args, "named_only", false),
        limit: opt_usize(&args, "limit").unwrap_or(defaults.limit),
    };

    let agents: Vec<Value> = ctx
        .registry
        .list(&filters)
        .into_iter()
        .map(|meta| {
            json!({
                "agent_id": meta.agent_id,
                "status": meta.status,
                "created_at": time::to_iso(&meta.created_at),
                "last_update_at": time::to_iso(&meta.last_update_at),
                "total_updates": meta.total_updates,
                "tags": meta.tags,
                "notes": meta.notes,
            })
        })
        .collect();

    ok(json!({ "count": agents.len(), "agents": agents }))
}

/// `get_agent_metadata` — full record, with the key hash withheld.
pub fn get_agent_metadata(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let meta = ctx.registry.require(&agent_id)?;
    let mut value = serde_json::to_value(&meta)
        .map_err(|e| RuntimeError::Internal(format!("metadata serialization: {e}")))?;
    if let Some(object) = value.as_object_mut() {
        object.remove("api_key_hash");
    }
    ok(json!({ "agent": value }))
}

/// `update_agent_metadata` — tags and notes.
pub fn update_agent_metadata(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let tags = args
        .get("tags")
        .and_then(Value::as_array)
        .map(|_| opt_str_list(&args, "tags"));
    let notes = opt_str(&args, "notes");
    let notes_mode = match opt_str(&args, "notes_mode").as_deref() {
        None | Some("append") => NotesMode::Append,
        Some("replace") => NotesMode::Replace,
        Some(other) => {
            return Err(ValidationError::Malformed(format!(
                "notes_mode must be append or replace, got {other}"
            ))
            .into())
        }
    };

    let updated = ctx
        .registry
        .update_fields(&agent_id, tags, notes, notes_mode)?;
    ok(json!({
        "agent_id": agent_id,
        "tags": updated.tags,
        "notes": updated.notes,
    }))
}

/// `archive_agent` — archived agents auto-resume on their next update.
pub fn archive_agent(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let reason = opt_str(&args, "reason");
    let keep_in_memory = opt_bool(&args, "keep_in_memory", true);

    ctx.registry.archive(&agent_id, reason)?;
    if !keep_in_memory {
        ctx.evict_monitor(&agent_id);
    }
    ok(json!({
        "agent_id": agent_id,
        "status": AgentStatus::Archived,
    }))
}

/// `delete_agent` — confirmed tombstoning with optional backup.
pub fn delete_agent(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    if !opt_bool(&args, "confirm", false) {
        return Err(StateMachineError::ConfirmationRequired.into());
    }
    let backup_first = opt_bool(&args, "backup_first", false);

    let backup_payload = if backup_first {
        ctx.store
            .read_json::<Value>(&ctx.store.agent_state_path(agent_id.as_str()))?
    } else {
        None
    };

    let backup = ctx.registry.delete(&agent_id, true, backup_payload)?;
    ctx.evict_monitor(&agent_id);

    ok(json!({
        "agent_id": agent_id,
        "deleted": true,
        "backup_file": backup.and_then(|p| {
            p.file_name().map(|n| n.to_string_lossy().into_owned())
        }),
    }))
}

/// `mark_response_complete` — explicit idle state pending input.
pub fn mark_response_complete(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let summary = opt_str(&args, "summary");
    ctx.registry.mark_response_complete(&agent_id, summary)?;
    ok(json!({
        "agent_id": agent_id,
        "status": AgentStatus::WaitingInput,
    }))
}

/// `direct_resume_if_safe` — tier-1 resume without a dialectic when the
/// metrics clear the bar.
pub fn direct_resume_if_safe(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let meta = ctx.registry.require(&agent_id)?;
    if meta.status != AgentStatus::Paused {
        return Err(StateMachineError::NotPaused {
            agent_id: agent_id.to_string(),
        }
        .into());
    }

    let thresholds = ctx.thresholds();
    let (metrics, void_threshold) = ctx.read_monitor(&agent_id, |monitor| {
        (
            monitor.metrics(&thresholds),
            monitor.effective_void_threshold(&thresholds),
        )
    })?;

    let coherence_ok = metrics.coherence >= thresholds.coherence_critical;
    let attention_ok = metrics.current_risk < thresholds.risk_revise;
    let void_ok = metrics.v.abs() <= void_threshold;
    let safe = coherence_ok && attention_ok && void_ok;

    if safe {
        ctx.registry.resume_from_pause(
            &agent_id,
            "resumed (direct, tier-1)",
            Some("metrics cleared the direct-resume bar".to_string()),
        )?;
    }

    ok(json!({
        "agent_id": agent_id,
        "resumed": safe,
        "checks": {
            "coherence_ok": coherence_ok,
            "attention_ok": attention_ok,
            "void_ok": void_ok,
        },
        "guidance": if safe {
            "Welcome back — easing in with smaller steps will keep things steady."
        } else {
            "Metrics are not quite there yet; a dialectic review is the supported path back."
        },
    }))
}

/// `reset_monitor` — reinitialize the thermodynamic state.
pub fn reset_monitor(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    ctx.registry.require(&agent_id)?;
    ctx.with_monitor(&agent_id, |monitor| {
        monitor.reset();
        Ok(())
    })?;
    ctx.registry.set_total_updates(&agent_id, 0)?;
    ctx.registry
        .append_event(&agent_id, "monitor reset", None)?;
    ok(json!({ "agent_id": agent_id, "reset": true }))
}
