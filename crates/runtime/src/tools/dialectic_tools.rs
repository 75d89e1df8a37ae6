//! Dialectic protocol handlers

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use serde_json::{json, Value};

use crate::dialectic::{
    reviewer, CandidateProfile, DisputeType, ResolutionAction, ResolutionExecutor,
};
use crate::knowledge::DiscoveryStatus;
use crate::monitor::MetricsSnapshot;
use crate::types::{
    time, AgentId, AgentStatus, RuntimeError, StateMachineError, ValidationError,
};

use super::{agent_id_arg, ok, opt_bool, opt_str, opt_str_list, req_str, ToolContext};

fn executor(ctx: &ToolContext) -> ResolutionExecutor<'_> {
    ResolutionExecutor {
        registry: &ctx.registry,
        graph: &ctx.graph,
        thresholds: &ctx.thresholds,
    }
}

fn parse_dispute_type(raw: &str) -> Result<DisputeType, RuntimeError> {
    serde_json::from_value(Value::String(raw.to_string())).map_err(|_| {
        ValidationError::Malformed(format!("unknown dispute_type: {raw}")).into()
    })
}

fn parse_action(raw: &str) -> Result<ResolutionAction, RuntimeError> {
    serde_json::from_value(Value::String(raw.to_string())).map_err(|_| {
        ValidationError::Malformed(format!("unknown resolution action: {raw}")).into()
    })
}

/// Metrics-derived antithesis used for self-recovery sessions.
fn canned_antithesis(metrics: &MetricsSnapshot) -> String {
    format!(
        "Automated review of the recorded metrics: coherence {:.3}, entropy {:.3}, \
         attention {:.3}, |V| {:.3}. The pause looks recoverable if the next steps stay \
         small and the workload stays below the recent complexity level. Propose concrete \
         conditions in your synthesis.",
        metrics.coherence,
        metrics.s,
        metrics.current_risk,
        metrics.v.abs(),
    )
}

/// `request_dialectic_review` — open a session for a paused agent or a
/// discovery dispute.
pub fn request_dialectic_review(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let reason = req_str(&args, "reason")?;
    let discovery_id = opt_str(&args, "discovery_id");
    let dispute_type = match opt_str(&args, "dispute_type") {
        Some(raw) => Some(parse_dispute_type(&raw)?),
        None => None,
    };

    let meta = ctx.registry.require(&agent_id)?;

    // Discovery disputes: the discovery's author is the fixed reviewer.
    if let Some(discovery_id) = discovery_id {
        let discovery = ctx.graph.get(&discovery_id)?;
        if discovery.status == DiscoveryStatus::Archived {
            return Err(StateMachineError::InvalidTransition {
                agent_id: discovery.agent_id.clone(),
                from: "archived".to_string(),
                to: "disputed".to_string(),
            }
            .into());
        }
        let reviewer_id = AgentId::from(discovery.agent_id.clone());
        let session = ctx.dialectic.create_session(
            agent_id.clone(),
            reviewer_id,
            Some(discovery_id.clone()),
            dispute_type.or(Some(DisputeType::Dispute)),
            false,
        )?;
        ctx.graph.update_status(
            &discovery_id,
            DiscoveryStatus::Disputed,
            None,
            Some(session.session_id.clone()),
        )?;
        ctx.registry.append_event(
            &agent_id,
            "dialectic review requested (discovery dispute)",
            Some(reason),
        )?;
        return ok(json!({
            "session": session,
            "next_step": "submit_thesis",
        }));
    }

    if meta.status != AgentStatus::Paused {
        return Err(StateMachineError::NotPaused {
            agent_id: agent_id.to_string(),
        }
        .into());
    }

    let sessions = ctx.dialectic.snapshot_all();
    let candidates: Vec<CandidateProfile> = ctx
        .registry
        .snapshot_all()
        .into_iter()
        .map(|candidate_meta| {
            let (coherence, mean_attention) =
                ctx.reviewer_metrics(&candidate_meta.agent_id);
            CandidateProfile {
                meta: candidate_meta,
                coherence,
                mean_attention,
            }
        })
        .collect();
    let exclusion = ChronoDuration::milliseconds(
        ctx.config.dialectic.review_exclusion_window.as_millis() as i64,
    );

    let picked = reviewer::select_reviewer(&meta, &candidates, &sessions, exclusion, time::now());
    let (reviewer_id, self_recovery) = match picked {
        Some(id) => (id, false),
        // Nobody available: promote to self-recovery.
        None => (agent_id.clone(), true),
    };

    let session = ctx.dialectic.create_session(
        agent_id.clone(),
        reviewer_id,
        None,
        None,
        self_recovery,
    )?;
    ctx.registry
        .append_event(&agent_id, "dialectic review requested", Some(reason))?;

    ok(json!({
        "session": session,
        "self_recovery": self_recovery,
        "next_step": "submit_thesis",
    }))
}

/// `submit_thesis` — the paused agent's account. Self-recovery sessions
/// receive a generated antithesis immediately.
pub fn submit_thesis(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let session_id = req_str(&args, "session_id")?;
    let thesis = req_str(&args, "thesis")?;

    let mut session = ctx
        .dialectic
        .submit_thesis(&session_id, &agent_id, thesis)?;

    let mut generated_antithesis = None;
    if session.self_recovery {
        let thresholds = ctx.thresholds();
        let metrics = ctx.read_monitor(&agent_id, |monitor| monitor.metrics(&thresholds))?;
        let antithesis = canned_antithesis(&metrics);
        let (updated, _) =
            ctx.dialectic
                .submit_antithesis(&session_id, &agent_id, antithesis.clone())?;
        session = updated;
        generated_antithesis = Some(antithesis);
    }

    let next_step = if session.self_recovery {
        "submit_synthesis"
    } else {
        "await antithesis"
    };
    ok(json!({
        "session": session,
        "generated_antithesis": generated_antithesis,
        "next_step": next_step,
    }))
}

/// `submit_antithesis` — the reviewer's counter-assessment.
pub fn submit_antithesis(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let session_id = req_str(&args, "session_id")?;
    let antithesis = req_str(&args, "antithesis")?;

    let (session, event) = ctx
        .dialectic
        .submit_antithesis(&session_id, &agent_id, antithesis)?;
    let applied = executor(&ctx).execute(&session, &event)?;

    ok(json!({
        "session": session,
        "applied": applied,
        "next_step": "submit_synthesis",
    }))
}

/// `submit_synthesis` — negotiation round; agreement executes the
/// resolution atomically.
pub fn submit_synthesis(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let session_id = req_str(&args, "session_id")?;
    let synthesis = req_str(&args, "synthesis")?;
    let agrees = opt_bool(&args, "agrees", false);
    let action = match opt_str(&args, "action") {
        Some(raw) => Some(parse_action(&raw)?),
        None => None,
    };
    let conditions = opt_str_list(&args, "conditions");
    let notes = opt_str(&args, "notes");

    let (session, event) = ctx.dialectic.submit_synthesis(
        &session_id,
        &agent_id,
        synthesis,
        agrees,
        action,
        conditions,
        notes,
    )?;
    let applied = executor(&ctx).execute(&session, &event)?;

    let terminal = session.state.is_terminal();
    ok(json!({
        "session": session,
        "applied": applied,
        "terminal": terminal,
    }))
}

/// `get_dialectic_session` — timeout promotion happens on access.
pub fn get_dialectic_session(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let session_id = req_str(&args, "session_id")?;
    let (session, event) = ctx.dialectic.get(&session_id)?;
    let applied = executor(&ctx).execute(&session, &event)?;
    ok(json!({ "session": session, "applied": applied }))
}

/// `self_recovery` — open a self-recovery session and prime it with the
/// caller's thesis in one call.
pub fn self_recovery(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let thesis = opt_str(&args, "thesis");

    let meta = ctx.registry.require(&agent_id)?;
    if meta.status != AgentStatus::Paused {
        return Err(StateMachineError::NotPaused {
            agent_id: agent_id.to_string(),
        }
        .into());
    }

    let session = ctx.dialectic.create_session(
        agent_id.clone(),
        agent_id.clone(),
        None,
        None,
        true,
    )?;

    let (session, generated_antithesis) = match thesis {
        Some(thesis) => {
            ctx.dialectic
                .submit_thesis(&session.session_id, &agent_id, thesis)?;
            let thresholds = ctx.thresholds();
            let metrics = ctx.read_monitor(&agent_id, |monitor| monitor.metrics(&thresholds))?;
            let antithesis = canned_antithesis(&metrics);
            let (updated, _) = ctx.dialectic.submit_antithesis(
                &session.session_id,
                &agent_id,
                antithesis.clone(),
            )?;
            (updated, Some(antithesis))
        }
        None => (session, None),
    };

    let next_step = if session.antithesis.is_some() {
        "submit_synthesis"
    } else {
        "submit_thesis"
    };
    ok(json!({
        "session": session,
        "generated_antithesis": generated_antithesis,
        "next_step": next_step,
    }))
}
