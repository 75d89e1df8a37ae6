//! Knowledge-graph handlers

use std::sync::Arc;

use serde_json::{json, Value};

use crate::knowledge::{
    DiscoveryStatus, DiscoveryType, NewDiscovery, SearchFilters, Severity, SortBy, SortOrder,
};
use crate::types::{time, AuthError, RuntimeError, ValidationError};

use super::{agent_id_arg, ok, opt_bool, opt_f64, opt_str, opt_str_list, opt_usize, req_str, ToolContext};

fn parse_enum<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T, RuntimeError> {
    serde_json::from_value(Value::String(raw.to_string())).map_err(|_| {
        ValidationError::Malformed(format!("unknown {what}: {raw}")).into()
    })
}

/// `store_knowledge_graph` — rate-limited store with severity gating.
pub fn store_knowledge_graph(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let agent_id = agent_id_arg(&args)?;
    let kind: DiscoveryType = parse_enum(&req_str(&args, "type")?, "discovery type")?;
    let severity: Severity = parse_enum(
        opt_str(&args, "severity").as_deref().unwrap_or("medium"),
        "severity",
    )?;
    let summary = req_str(&args, "summary")?;
    let details = opt_str(&args, "details").unwrap_or_default();
    let check_duplicates = opt_bool(&args, "check_duplicates", false);

    // High-impact claims need a registered, authenticated author.
    if severity.requires_authentication() {
        let api_key = opt_str(&args, "api_key").ok_or(AuthError::KeyRequired {
            agent_id: agent_id.to_string(),
        })?;
        ctx.registry.verify_key(&agent_id, &api_key)?;
    }

    ctx.registry.admit_knowledge_store(&agent_id, time::now())?;

    let outcome = ctx.graph.store_discovery(
        NewDiscovery {
            agent_id: agent_id.to_string(),
            kind,
            summary,
            details,
            severity,
            tags: opt_str_list(&args, "tags"),
            related_files: opt_str_list(&args, "related_files"),
            related_discoveries: opt_str_list(&args, "related_discoveries"),
        },
        check_duplicates,
    )?;

    ok(json!({
        "discovery_id": outcome.id,
        "duplicate_warnings": outcome.duplicate_warnings,
    }))
}

/// `search_knowledge_graph` — composable filters over the indices.
pub fn search_knowledge_graph(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let kind = match opt_str(&args, "type") {
        Some(raw) => Some(parse_enum::<DiscoveryType>(&raw, "discovery type")?),
        None => None,
    };
    let severity = match opt_str(&args, "severity") {
        Some(raw) => Some(parse_enum::<Severity>(&raw, "severity")?),
        None => None,
    };
    let status = match opt_str(&args, "status") {
        Some(raw) => Some(parse_enum::<DiscoveryStatus>(&raw, "status")?),
        None => None,
    };
    let sort_by = match opt_str(&args, "sort_by").as_deref() {
        None | Some("timestamp") => SortBy::Timestamp,
        Some("severity") => SortBy::Severity,
        Some(other) => {
            return Err(ValidationError::Malformed(format!(
                "sort_by must be timestamp or severity, got {other}"
            ))
            .into())
        }
    };
    let sort_order = match opt_str(&args, "sort_order").as_deref() {
        None | Some("desc") => SortOrder::Desc,
        Some("asc") => SortOrder::Asc,
        Some(other) => {
            return Err(ValidationError::Malformed(format!(
                "sort_order must be asc or desc, got {other}"
            ))
            .into())
        }
    };

    let filters = SearchFilters {
        agent_id: opt_str(&args, "agent_id"),
        kind,
        tags: opt_str_list(&args, "tags"),
        severity,
        status,
        text: opt_str(&args, "text"),
        limit: opt_usize(&args, "limit").unwrap_or(100),
        sort_by,
        sort_order,
    };

    let hits = ctx.graph.search(&filters);
    ok(json!({ "count": hits.len(), "discoveries": hits }))
}

/// `get_knowledge_graph` — statistics plus the most recent discoveries.
pub fn get_knowledge_graph(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let limit = opt_usize(&args, "limit").unwrap_or(20);
    let recent = ctx.graph.search(&SearchFilters {
        limit,
        ..Default::default()
    });

    let mut by_status = std::collections::BTreeMap::new();
    let mut by_type = std::collections::BTreeMap::new();
    for status in [
        DiscoveryStatus::Open,
        DiscoveryStatus::Resolved,
        DiscoveryStatus::Archived,
        DiscoveryStatus::Disputed,
    ] {
        let count = ctx
            .graph
            .search(&SearchFilters {
                status: Some(status),
                limit: usize::MAX,
                ..Default::default()
            })
            .len();
        if count > 0 {
            by_status.insert(status.as_str(), count);
        }
    }
    for kind in [
        DiscoveryType::BugFound,
        DiscoveryType::Insight,
        DiscoveryType::Pattern,
        DiscoveryType::Improvement,
        DiscoveryType::Question,
    ] {
        let count = ctx
            .graph
            .search(&SearchFilters {
                kind: Some(kind),
                limit: usize::MAX,
                ..Default::default()
            })
            .len();
        if count > 0 {
            by_type.insert(kind.as_str(), count);
        }
    }

    ok(json!({
        "total": ctx.graph.len(),
        "by_status": by_status,
        "by_type": by_type,
        "recent": recent,
    }))
}

/// `find_similar_discoveries_graph` — Jaccard-style similarity search.
pub fn find_similar_discoveries_graph(
    ctx: Arc<ToolContext>,
    args: Value,
) -> Result<Value, RuntimeError> {
    let summary = req_str(&args, "summary")?;
    let tags = opt_str_list(&args, "tags");
    let threshold = opt_f64(&args, "threshold").unwrap_or(0.3);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ValidationError::OutOfRange {
            field: "threshold".to_string(),
            reason: format!("{threshold} is outside [0, 1]"),
        }
        .into());
    }
    let limit = opt_usize(&args, "limit").unwrap_or(10);

    let matches = ctx.graph.find_similar(&summary, &tags, threshold, limit);
    ok(json!({ "count": matches.len(), "matches": matches }))
}

/// `update_discovery_status_graph` — enum-enforced status transitions.
pub fn update_discovery_status_graph(
    ctx: Arc<ToolContext>,
    args: Value,
) -> Result<Value, RuntimeError> {
    let discovery_id = req_str(&args, "discovery_id")?;
    let status: DiscoveryStatus = parse_enum(&req_str(&args, "status")?, "status")?;
    let resolution_note = opt_str(&args, "resolution_note");
    let session_id = opt_str(&args, "session_id");

    // A dispute must reference a real dialectic session.
    if status == DiscoveryStatus::Disputed {
        match &session_id {
            Some(id) => {
                ctx.dialectic.get(id)?;
            }
            None => {
                return Err(ValidationError::MissingField(
                    "session_id (disputes must reference a dialectic session)".to_string(),
                )
                .into())
            }
        }
    }

    let updated = ctx
        .graph
        .update_status(&discovery_id, status, resolution_note, session_id)?;
    ok(json!({ "discovery": updated }))
}

/// `get_discovery_details` — one discovery by id.
pub fn get_discovery_details(ctx: Arc<ToolContext>, args: Value) -> Result<Value, RuntimeError> {
    let discovery_id = req_str(&args, "discovery_id")?;
    let discovery = ctx.graph.get(&discovery_id)?;
    ok(json!({ "discovery": discovery }))
}
