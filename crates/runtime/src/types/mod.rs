//! Core types and data structures for the governance runtime

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub mod error;
pub mod time;

pub use error::*;

/// Unique identifier for agents. Externally chosen, opaque, process-wide
/// unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for AgentId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Agent lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Active,
    WaitingInput,
    Paused,
    Archived,
    Deleted,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::WaitingInput => "waiting_input",
            AgentStatus::Paused => "paused",
            AgentStatus::Archived => "archived",
            AgentStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational recommendation produced by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Proceed,
    Pause,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Proceed => "proceed",
            DecisionAction::Pause => "pause",
        }
    }
}

/// Qualitative verdict accompanying a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Safe,
    Caution,
    HighRisk,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Safe => "safe",
            Verdict::Caution => "caution",
            Verdict::HighRisk => "high-risk",
        }
    }
}

/// Aggregate health band over an agent's recent history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Moderate,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Moderate => "moderate",
            HealthStatus::Critical => "critical",
        }
    }
}

/// Append-only lifecycle record entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event: String,
    #[serde(with = "time::iso")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl LifecycleEvent {
    pub fn new(event: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            event: event.into(),
            timestamp: time::now(),
            reason,
        }
    }
}

/// Ring buffer capacities for the metadata record
pub const RECENT_DECISIONS_CAP: usize = 20;
pub const RECENT_UPDATES_CAP: usize = 20;
pub const RECENT_STORES_CAP: usize = 32;

/// Tag that protects an agent from deletion
pub const PIONEER_TAG: &str = "pioneer";

/// Per-agent metadata record owned by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub agent_id: AgentId,
    pub api_key_hash: String,
    pub status: AgentStatus,
    #[serde(with = "time::iso")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "time::iso")]
    pub last_update_at: DateTime<Utc>,
    #[serde(with = "time::iso_opt", default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(with = "time::iso_opt", default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    pub total_updates: u64,
    #[serde(default)]
    pub lifecycle_events: Vec<LifecycleEvent>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(with = "decision_deque", default)]
    pub recent_decisions: VecDeque<DecisionAction>,
    #[serde(with = "time::iso_deque", default)]
    pub recent_update_timestamps: VecDeque<DateTime<Utc>>,
    #[serde(with = "time::iso_opt", default, skip_serializing_if = "Option::is_none")]
    pub loop_cooldown_until: Option<DateTime<Utc>>,
    #[serde(with = "time::iso_deque", default)]
    pub recent_store_timestamps: VecDeque<DateTime<Utc>>,
}

impl AgentMetadata {
    /// Fresh record for a newly registered agent.
    pub fn new(agent_id: AgentId, api_key_hash: String) -> Self {
        let now = time::now();
        Self {
            agent_id,
            api_key_hash,
            status: AgentStatus::Active,
            created_at: now,
            last_update_at: now,
            archived_at: None,
            paused_at: None,
            total_updates: 0,
            lifecycle_events: vec![LifecycleEvent::new("registered", None)],
            tags: Vec::new(),
            notes: String::new(),
            recent_decisions: VecDeque::new(),
            recent_update_timestamps: VecDeque::new(),
            loop_cooldown_until: None,
            recent_store_timestamps: VecDeque::new(),
        }
    }

    pub fn is_pioneer(&self) -> bool {
        self.tags.iter().any(|t| t == PIONEER_TAG)
    }

    /// Remaining cooldown, if the agent is currently in one.
    pub fn active_cooldown(&self, now: DateTime<Utc>) -> Option<f64> {
        self.loop_cooldown_until.and_then(|until| {
            let remaining = (until - now).num_milliseconds() as f64 / 1000.0;
            (remaining > 0.0).then_some(remaining)
        })
    }

    /// Record a classification outcome in the decision ring.
    pub fn push_decision(&mut self, action: DecisionAction) {
        self.recent_decisions.push_back(action);
        while self.recent_decisions.len() > RECENT_DECISIONS_CAP {
            self.recent_decisions.pop_front();
        }
    }

    /// Record an accepted update arrival in the timestamp ring.
    pub fn push_update_timestamp(&mut self, ts: DateTime<Utc>) {
        self.recent_update_timestamps.push_back(ts);
        while self.recent_update_timestamps.len() > RECENT_UPDATES_CAP {
            self.recent_update_timestamps.pop_front();
        }
    }

    /// Record a knowledge-graph store in the rate-limit ring.
    pub fn push_store_timestamp(&mut self, ts: DateTime<Utc>) {
        self.recent_store_timestamps.push_back(ts);
        while self.recent_store_timestamps.len() > RECENT_STORES_CAP {
            self.recent_store_timestamps.pop_front();
        }
    }

    /// Apply a status change with its lifecycle event. The caller is
    /// responsible for forcing an immediate metadata save afterwards.
    pub fn set_status(&mut self, status: AgentStatus, event: &str, reason: Option<String>) {
        let now = time::now();
        self.status = status;
        match status {
            AgentStatus::Paused => self.paused_at = Some(now),
            AgentStatus::Archived => self.archived_at = Some(now),
            AgentStatus::Active => {
                self.paused_at = None;
            }
            _ => {}
        }
        self.lifecycle_events
            .push(LifecycleEvent::new(event, reason));
    }
}

/// Serde adapter for the decision ring buffer (stored as plain strings).
mod decision_deque {
    use super::DecisionAction;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::VecDeque;

    pub fn serialize<S: Serializer>(
        ring: &VecDeque<DecisionAction>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        ser.collect_seq(ring.iter().map(|d| d.as_str()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<VecDeque<DecisionAction>, D::Error> {
        let raw: Vec<String> = Vec::deserialize(de)?;
        raw.iter()
            .map(|s| match s.as_str() {
                "proceed" => Ok(DecisionAction::Proceed),
                "pause" => Ok(DecisionAction::Pause),
                other => Err(serde::de::Error::custom(format!(
                    "unknown decision action: {other}"
                ))),
            })
            .collect()
    }
}
