//! Dialectic recovery protocol
//!
//! A bounded multi-party negotiation that can resume a paused agent:
//! thesis from the paused party, antithesis from a reviewer, then up to
//! `max_synthesis_rounds` of synthesis until agreement, blockage, or
//! timeout. Discovery disputes ride the same state machine with the
//! discovery's author as the fixed reviewer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{time, AgentId};

pub mod engine;
pub mod resolution;
pub mod reviewer;

pub use engine::{DialecticEngine, SessionEvent};
pub use resolution::{parse_condition, RecognizedCondition, ResolutionExecutor};
pub use reviewer::{select_reviewer, CandidateProfile};

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingThesis,
    AwaitingAntithesis,
    Negotiating,
    Resolved,
    Blocked,
    TimedOut,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::AwaitingThesis => "awaiting_thesis",
            SessionState::AwaitingAntithesis => "awaiting_antithesis",
            SessionState::Negotiating => "negotiating",
            SessionState::Resolved => "resolved",
            SessionState::Blocked => "blocked",
            SessionState::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Resolved | SessionState::Blocked | SessionState::TimedOut
        )
    }
}

/// Why a discovery dispute was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeType {
    Dispute,
    Correction,
    Verification,
}

/// What a resolved session does to the paused agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    Resume,
    Block,
    Escalate,
}

/// Terminal outcome of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub action: ResolutionAction,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

/// One synthesis exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRound {
    pub author: AgentId,
    pub agrees: bool,
    pub content: String,
    #[serde(with = "time::iso")]
    pub timestamp: DateTime<Utc>,
}

/// Persisted session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialecticSession {
    pub session_id: String,
    pub paused_agent_id: AgentId,
    pub reviewer_agent_id: AgentId,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thesis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antithesis: Option<String>,
    #[serde(default)]
    pub synthesis_rounds: Vec<SynthesisRound>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute_type: Option<DisputeType>,
    #[serde(with = "time::iso")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "time::iso")]
    pub last_activity_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// Reviewer and paused party are the same agent
    #[serde(default)]
    pub self_recovery: bool,
}

impl DialecticSession {
    pub fn new(
        paused_agent_id: AgentId,
        reviewer_agent_id: AgentId,
        discovery_id: Option<String>,
        dispute_type: Option<DisputeType>,
        self_recovery: bool,
    ) -> Self {
        let now = time::now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            paused_agent_id,
            reviewer_agent_id,
            state: SessionState::AwaitingThesis,
            thesis: None,
            antithesis: None,
            synthesis_rounds: Vec::new(),
            discovery_id,
            dispute_type,
            created_at: now,
            last_activity_at: now,
            resolution: None,
            self_recovery,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = time::now();
    }
}
