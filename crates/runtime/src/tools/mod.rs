//! Tool dispatcher and handler surface
//!
//! Tool metadata lives in a static table keyed by name; every handler has
//! the uniform signature `fn(Arc<ToolContext>, Value) -> Result<Value>`.
//! The dispatcher — not the handlers — enforces authentication, per-tool
//! timeouts, and error shaping into the common envelope. Handlers run on
//! the blocking pool so file I/O never stalls the transport loop; a call
//! that outruns its timeout has its result discarded while its lock
//! guards release as the task unwinds.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::registry::ratelimit::RateCategory;
use crate::types::{
    AgentId, AuthError, NotFoundError, RetryableError, RuntimeError, ValidationError,
};

pub mod admin_tools;
pub mod agent_tools;
pub mod context;
pub mod dialectic_tools;
pub mod knowledge_tools;

pub use context::{ToolContext, ToolUsage};

/// Handler signature shared by every tool
pub type HandlerFn = fn(Arc<ToolContext>, Value) -> Result<Value, RuntimeError>;

/// Timeout class; the concrete durations come from `DispatchConfig`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Default,
    Update,
    Admin,
}

/// What the dispatcher verifies before invoking the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequirement {
    /// No key needed (reads, registration)
    None,
    /// `agent_id` + matching `api_key` required
    AgentKey,
}

/// Static metadata for one tool
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub timeout: TimeoutClass,
    pub auth: AuthRequirement,
    pub rate_class: Option<RateCategory>,
    pub handler: HandlerFn,
}

/// The complete tool table. Order matters only for listings.
pub static TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "get_agent_api_key",
        description: "Register an agent or rotate its API key; the key is returned once",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: agent_tools::get_agent_api_key,
    },
    ToolSpec {
        name: "process_agent_update",
        description: "Integrate one agent update and classify it",
        timeout: TimeoutClass::Update,
        auth: AuthRequirement::AgentKey,
        rate_class: Some(RateCategory::Updates),
        handler: agent_tools::process_agent_update,
    },
    ToolSpec {
        name: "get_governance_metrics",
        description: "Current thermodynamic and classification snapshot for an agent",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: agent_tools::get_governance_metrics,
    },
    ToolSpec {
        name: "simulate_update",
        description: "Dry-run an update without persisting anything",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: agent_tools::simulate_update,
    },
    ToolSpec {
        name: "list_agents",
        description: "Summaries of known agents with recency/status filters",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: agent_tools::list_agents,
    },
    ToolSpec {
        name: "get_agent_metadata",
        description: "Full metadata record for one agent",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: agent_tools::get_agent_metadata,
    },
    ToolSpec {
        name: "update_agent_metadata",
        description: "Update an agent's tags and notes",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::AgentKey,
        rate_class: None,
        handler: agent_tools::update_agent_metadata,
    },
    ToolSpec {
        name: "archive_agent",
        description: "Archive an agent; it auto-resumes on its next update",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::AgentKey,
        rate_class: None,
        handler: agent_tools::archive_agent,
    },
    ToolSpec {
        name: "delete_agent",
        description: "Tombstone an agent (confirm required; pioneer protected)",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::AgentKey,
        rate_class: None,
        handler: agent_tools::delete_agent,
    },
    ToolSpec {
        name: "mark_response_complete",
        description: "Mark the agent idle pending external input",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::AgentKey,
        rate_class: None,
        handler: agent_tools::mark_response_complete,
    },
    ToolSpec {
        name: "direct_resume_if_safe",
        description: "Tier-1 resume of a paused agent when its metrics allow it",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::AgentKey,
        rate_class: None,
        handler: agent_tools::direct_resume_if_safe,
    },
    ToolSpec {
        name: "reset_monitor",
        description: "Reinitialize an agent's thermodynamic state",
        timeout: TimeoutClass::Admin,
        auth: AuthRequirement::AgentKey,
        rate_class: None,
        handler: agent_tools::reset_monitor,
    },
    ToolSpec {
        name: "request_dialectic_review",
        description: "Open a dialectic session for a paused agent or a discovery dispute",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::AgentKey,
        rate_class: None,
        handler: dialectic_tools::request_dialectic_review,
    },
    ToolSpec {
        name: "submit_thesis",
        description: "Paused agent's account of what went wrong",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::AgentKey,
        rate_class: None,
        handler: dialectic_tools::submit_thesis,
    },
    ToolSpec {
        name: "submit_antithesis",
        description: "Reviewer's counter-assessment",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::AgentKey,
        rate_class: None,
        handler: dialectic_tools::submit_antithesis,
    },
    ToolSpec {
        name: "submit_synthesis",
        description: "One negotiation round; agreement resolves the session",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::AgentKey,
        rate_class: None,
        handler: dialectic_tools::submit_synthesis,
    },
    ToolSpec {
        name: "get_dialectic_session",
        description: "Fetch a session record (timeouts are applied on access)",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: dialectic_tools::get_dialectic_session,
    },
    ToolSpec {
        name: "self_recovery",
        description: "Self-recovery dialectic with a generated antithesis",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::AgentKey,
        rate_class: None,
        handler: dialectic_tools::self_recovery,
    },
    ToolSpec {
        name: "store_knowledge_graph",
        description: "Store a discovery (rate limited; high severity requires auth)",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::None,
        rate_class: Some(RateCategory::KnowledgeStores),
        handler: knowledge_tools::store_knowledge_graph,
    },
    ToolSpec {
        name: "search_knowledge_graph",
        description: "Filtered search over discoveries",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: knowledge_tools::search_knowledge_graph,
    },
    ToolSpec {
        name: "get_knowledge_graph",
        description: "Graph statistics and the most recent discoveries",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: knowledge_tools::get_knowledge_graph,
    },
    ToolSpec {
        name: "find_similar_discoveries_graph",
        description: "Tag/keyword similarity search",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: knowledge_tools::find_similar_discoveries_graph,
    },
    ToolSpec {
        name: "update_discovery_status_graph",
        description: "Change a discovery's status (disputes need a session)",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: knowledge_tools::update_discovery_status_graph,
    },
    ToolSpec {
        name: "get_discovery_details",
        description: "Fetch one discovery by id",
        timeout: TimeoutClass::Default,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: knowledge_tools::get_discovery_details,
    },
    ToolSpec {
        name: "get_thresholds",
        description: "Live classification thresholds and dynamics constants",
        timeout: TimeoutClass::Admin,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: admin_tools::get_thresholds,
    },
    ToolSpec {
        name: "set_thresholds",
        description: "Adjust thresholds (refused for degraded callers)",
        timeout: TimeoutClass::Admin,
        auth: AuthRequirement::AgentKey,
        rate_class: None,
        handler: admin_tools::set_thresholds,
    },
    ToolSpec {
        name: "health_check",
        description: "Server liveness and basic counts",
        timeout: TimeoutClass::Admin,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: admin_tools::health_check,
    },
    ToolSpec {
        name: "get_server_info",
        description: "Version, uptime, and configuration summary",
        timeout: TimeoutClass::Admin,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: admin_tools::get_server_info,
    },
    ToolSpec {
        name: "cleanup_stale_locks",
        description: "Reap advisory locks with dead owners",
        timeout: TimeoutClass::Admin,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: admin_tools::cleanup_stale_locks,
    },
    ToolSpec {
        name: "list_tools",
        description: "Names, descriptions, and limits of every tool",
        timeout: TimeoutClass::Admin,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: admin_tools::list_tools,
    },
    ToolSpec {
        name: "get_tool_usage_stats",
        description: "Per-tool call counters",
        timeout: TimeoutClass::Admin,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: admin_tools::get_tool_usage_stats,
    },
    ToolSpec {
        name: "get_workspace_health",
        description: "Aggregate health across agents, sessions, and the graph",
        timeout: TimeoutClass::Admin,
        auth: AuthRequirement::None,
        rate_class: None,
        handler: admin_tools::get_workspace_health,
    },
];

/// Routes tool calls, enforcing auth, timeouts, and error shaping
pub struct ToolDispatcher {
    ctx: Arc<ToolContext>,
    specs: BTreeMap<&'static str, &'static ToolSpec>,
}

impl ToolDispatcher {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        let specs = TOOLS.iter().map(|spec| (spec.name, spec)).collect();
        Self { ctx, specs }
    }

    pub fn context(&self) -> &Arc<ToolContext> {
        &self.ctx
    }

    fn timeout_for(&self, class: TimeoutClass) -> Duration {
        let cfg = &self.ctx.config.dispatch;
        match class {
            TimeoutClass::Default => cfg.default_timeout,
            TimeoutClass::Update => cfg.update_timeout,
            TimeoutClass::Admin => cfg.admin_timeout,
        }
    }

    fn check_auth(&self, spec: &ToolSpec, args: &Value) -> Result<(), RuntimeError> {
        if spec.auth == AuthRequirement::None {
            return Ok(());
        }
        let agent_id = agent_id_arg(args)?;
        let api_key = opt_str(args, "api_key").ok_or(AuthError::KeyRequired {
            agent_id: agent_id.to_string(),
        })?;
        self.ctx.registry.verify_key(&agent_id, &api_key)
    }

    /// Dispatch one call. The return value is always a complete JSON
    /// envelope: either the handler's success payload or the sanitized
    /// error shape.
    pub async fn dispatch(&self, tool: &str, args: Value) -> Value {
        let started = std::time::Instant::now();
        let result = self.dispatch_inner(tool, args).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                self.ctx.record_usage(tool, elapsed_ms, false);
                value
            }
            Err(err) => {
                self.ctx.record_usage(tool, elapsed_ms, true);
                // Full detail stays server-side; the envelope is sanitized.
                tracing::error!(tool, error = %err, code = err.error_code(), "tool call failed");
                serde_json::to_value(err.to_envelope()).unwrap_or_else(|_| {
                    json!({"success": false, "error": "internal error"})
                })
            }
        }
    }

    async fn dispatch_inner(&self, tool: &str, args: Value) -> Result<Value, RuntimeError> {
        let spec = *self
            .specs
            .get(tool)
            .ok_or_else(|| RuntimeError::from(NotFoundError::Tool(tool.to_string())))?;

        self.check_auth(spec, &args)?;

        let ctx = Arc::clone(&self.ctx);
        let handler = spec.handler;
        let limit = self.timeout_for(spec.timeout);

        let joined = tokio::time::timeout(
            limit,
            tokio::task::spawn_blocking(move || handler(ctx, args)),
        )
        .await;

        match joined {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(RuntimeError::Internal(format!(
                "handler for {tool} aborted: {join_err}"
            ))),
            Err(_elapsed) => Err(RetryableError::ToolTimeout {
                tool: tool.to_string(),
                limit_ms: limit.as_millis() as u64,
            }
            .into()),
        }
    }
}

// ----------------------------------------------------------------------
// Argument helpers shared by the handler modules
// ----------------------------------------------------------------------

pub(crate) fn req_str(args: &Value, key: &str) -> Result<String, RuntimeError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ValidationError::MissingField(key.to_string()).into())
}

pub(crate) fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn opt_f64(args: &Value, key: &str) -> Option<f64> {
    args.get(key).and_then(Value::as_f64)
}

pub(crate) fn opt_bool(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(default)
}

pub(crate) fn opt_usize(args: &Value, key: &str) -> Option<usize> {
    args.get(key).and_then(Value::as_u64).map(|v| v as usize)
}

pub(crate) fn opt_str_list(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn agent_id_arg(args: &Value) -> Result<AgentId, RuntimeError> {
    Ok(AgentId::from(req_str(args, "agent_id")?))
}

/// Parse an optional 3-vector drift argument.
pub(crate) fn opt_drift(args: &Value) -> Result<Option<[f64; 3]>, RuntimeError> {
    match args.get("drift") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => {
            if items.len() != 3 {
                return Err(ValidationError::OutOfRange {
                    field: "drift".to_string(),
                    reason: format!("expected 3 components, got {}", items.len()),
                }
                .into());
            }
            let mut drift = [0.0; 3];
            for (slot, item) in drift.iter_mut().zip(items) {
                *slot = item.as_f64().ok_or_else(|| {
                    RuntimeError::from(ValidationError::Malformed(
                        "drift components must be numbers".to_string(),
                    ))
                })?;
            }
            Ok(Some(drift))
        }
        Some(_) => Err(ValidationError::Malformed(
            "drift must be an array of 3 numbers".to_string(),
        )
        .into()),
    }
}

/// Wrap a handler payload with `success: true`.
pub(crate) fn ok(mut payload: Value) -> Result<Value, RuntimeError> {
    if let Some(object) = payload.as_object_mut() {
        object.insert("success".to_string(), Value::Bool(true));
    }
    Ok(payload)
}
