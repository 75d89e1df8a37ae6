//! Administrative and observability handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::knowledge::{DiscoveryStatus, SearchFilters};
use crate::types::{AgentStatus, AuthError, HealthStatus, RuntimeError, ValidationError};

use super::{agent_id_arg, ok, opt_f64, opt_usize, ToolContext, TimeoutClass, TOOLS};

/// `get_thresholds` — everything the classifier currently runs on.
pub fn get_thresholds(ctx: Arc<ToolContext>, _args: Value) -> Result<Value, RuntimeError> {
    let thresholds = ctx.thresholds();
    ok(json!({
        "thresholds": thresholds,
        "dynamics": ctx.config.dynamics,
        "controller": ctx.config.controller,
        "rate_limits": ctx.config.rate_limits,
    }))
}

/// `set_thresholds` — live adjustment, refused for degraded callers.
pub fn set_thresholds(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    ctx.registry.require(&agent_id)?;

    // A struggling agent does not get to move its own goalposts.
    if ctx.has_monitor_state(&agent_id) {
        let thresholds = ctx.thresholds();
        let metrics = ctx.read_monitor(&agent_id, |monitor| monitor.metrics(&thresholds))?;
        if metrics.health_status == HealthStatus::Critical {
            return Err(AuthError::AdminRefused {
                reason: "caller health is critical".to_string(),
            }
            .into());
        }
        if metrics.current_risk > thresholds.risk_revise {
            return Err(AuthError::AdminRefused {
                reason: format!(
                    "caller attention {:.3} exceeds {:.2}",
                    metrics.current_risk, thresholds.risk_revise
                ),
            }
            .into());
        }
    }

    let unit_field = |key: &str| -> Result<Option<f64>, RuntimeError> {
        match opt_f64(&args, key) {
            Some(value) if (0.0..=1.0).contains(&value) => Ok(Some(value)),
            Some(value) => Err(ValidationError::OutOfRange {
                field: key.to_string(),
                reason: format!("{value} is outside [0, 1]"),
            }
            .into()),
            None => Ok(None),
        }
    };

    let coherence_critical = unit_field("coherence_critical")?;
    let void_threshold = unit_field("void_threshold")?;
    let risk_revise = unit_field("risk_revise")?;
    let risk_approve = unit_field("risk_approve")?;
    let healthy_attention = unit_field("healthy_attention")?;
    let healthy_coherence = unit_field("healthy_coherence")?;
    let moderate_attention = unit_field("moderate_attention")?;
    let max_response_bytes = opt_usize(&args, "max_response_bytes");

    let mut changed = Vec::new();
    {
        let mut live = ctx.thresholds.write();
        let mut next = live.clone();
        if let Some(v) = coherence_critical {
            next.coherence_critical = v;
            changed.push("coherence_critical");
        }
        if let Some(v) = void_threshold {
            next.void_threshold = v;
            changed.push("void_threshold");
        }
        if let Some(v) = risk_revise {
            next.risk_revise = v;
            changed.push("risk_revise");
        }
        if let Some(v) = risk_approve {
            next.risk_approve = v;
            changed.push("risk_approve");
        }
        if let Some(v) = healthy_attention {
            next.healthy_attention = v;
            changed.push("healthy_attention");
        }
        if let Some(v) = healthy_coherence {
            next.healthy_coherence = v;
            changed.push("healthy_coherence");
        }
        if let Some(v) = moderate_attention {
            next.moderate_attention = v;
            changed.push("moderate_attention");
        }
        if let Some(v) = max_response_bytes {
            if v == 0 {
                return Err(ValidationError::OutOfRange {
                    field: "max_response_bytes".to_string(),
                    reason: "must be positive".to_string(),
                }
                .into());
            }
            next.max_response_bytes = v;
            changed.push("max_response_bytes");
        }

        if next.risk_approve > next.risk_revise {
            return Err(ValidationError::OutOfRange {
                field: "risk_approve".to_string(),
                reason: "must not exceed risk_revise".to_string(),
            }
            .into());
        }
        *live = next;
    }

    tracing::info!(agent_id = %agent_id, fields = ?changed, "thresholds adjusted");
    ok(json!({
        "changed": changed,
        "thresholds": ctx.thresholds(),
    }))
}

fn status_counts(ctx: &ToolContext) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for meta in ctx.registry.snapshot_all() {
        *counts.entry(meta.status.as_str()).or_insert(0) += 1;
    }
    counts
}

/// `health_check` — liveness and basic counts.
pub fn health_check(ctx: Arc<ToolContext>, _args: Value) -> Result<Value, RuntimeError> {
    ok(json!({
        "status": "ok",
        "uptime_seconds": ctx.started_at.elapsed().as_secs(),
        "agents": status_counts(&ctx),
        "discoveries": ctx.graph.len(),
    }))
}

/// `get_server_info` — version and configuration summary.
pub fn get_server_info(ctx: Arc<ToolContext>, _args: Value) -> Result<Value, RuntimeError> {
    ok(json!({
        "name": "govmon",
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": crate::types::time::to_iso(&ctx.started_at_wall),
        "uptime_seconds": ctx.started_at.elapsed().as_secs(),
        "limits": {
            "max_response_bytes": ctx.thresholds().max_response_bytes,
            "knowledge_stores_per_hour": ctx.config.rate_limits.knowledge_stores_per_hour,
            "updates_per_hour": ctx.config.rate_limits.updates_per_hour,
            "max_synthesis_rounds": ctx.config.dialectic.max_synthesis_rounds,
        },
        "tool_count": TOOLS.len(),
    }))
}

/// `cleanup_stale_locks` — on-demand reaping.
pub fn cleanup_stale_locks(ctx: Arc<ToolContext>, _args: Value) -> Result<Value, RuntimeError> {
    let reaped = ctx.locks.cleanup_stale()?;
    ok(json!({ "reaped": reaped }))
}

/// `list_tools` — the full registered surface.
pub fn list_tools(ctx: Arc<ToolContext>, _args: Value) -> Result<Value, RuntimeError> {
    let dispatch = &ctx.config.dispatch;
    let tools: Vec<Value> = TOOLS
        .iter()
        .map(|spec| {
            let timeout = match spec.timeout {
                TimeoutClass::Default => dispatch.default_timeout,
                TimeoutClass::Update => dispatch.update_timeout,
                TimeoutClass::Admin => dispatch.admin_timeout,
            };
            json!({
                "name": spec.name,
                "description": spec.description,
                "timeout_ms": timeout.as_millis() as u64,
                "requires_api_key": spec.auth == super::AuthRequirement::AgentKey,
                "rate_class": spec.rate_class.map(|c| c.as_str()),
            })
        })
        .collect();
    ok(json!({ "count": tools.len(), "tools": tools }))
}

/// `get_tool_usage_stats` — per-tool counters since startup.
pub fn get_tool_usage_stats(ctx: Arc<ToolContext>, _args: Value) -> Result<Value, RuntimeError> {
    let stats: BTreeMap<String, super::ToolUsage> = ctx
        .usage
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();
    ok(json!({ "tools": stats }))
}

/// `get_workspace_health` — cross-agent aggregate view.
pub fn get_workspace_health(ctx: Arc<ToolContext>, _args: Value) -> Result<Value, RuntimeError> {
    let thresholds = ctx.thresholds();
    let mut coherences = Vec::new();
    let mut critical_agents = 0usize;

    for meta in ctx.registry.snapshot_all() {
        if meta.status == AgentStatus::Deleted || !ctx.has_monitor_state(&meta.agent_id) {
            continue;
        }
        if let Ok(metrics) =
            ctx.read_monitor(&meta.agent_id, |monitor| monitor.metrics(&thresholds))
        {
            coherences.push(metrics.coherence);
            if metrics.health_status == HealthStatus::Critical {
                critical_agents += 1;
            }
        }
    }

    let mean_coherence = if coherences.is_empty() {
        None
    } else {
        Some(coherences.iter().sum::<f64>() / coherences.len() as f64)
    };

    let live_sessions = ctx
        .dialectic
        .snapshot_all()
        .into_iter()
        .filter(|s| !s.state.is_terminal())
        .count();
    let open_discoveries = ctx
        .graph
        .search(&SearchFilters {
            status: Some(DiscoveryStatus::Open),
            limit: usize::MAX,
            ..Default::default()
        })
        .len();

    ok(json!({
        "agents": status_counts(&ctx),
        "monitored": coherences.len(),
        "mean_coherence": mean_coherence,
        "critical_agents": critical_agents,
        "live_dialectic_sessions": live_sessions,
        "open_discoveries": open_discoveries,
        "discoveries_total": ctx.graph.len(),
    }))
}
