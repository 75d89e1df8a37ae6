//! Dialectic session state machine
//!
//! Transitions are validated here; side effects of terminal outcomes are
//! applied by the `ResolutionExecutor`. Every mutation persists the
//! session record atomically. Timeout promotion happens on any access,
//! so no background daemon is needed.

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;

use crate::config::DialecticConfig;
use crate::store::FileStore;
use crate::types::{
    time, AgentId, AuthError, NotFoundError, RuntimeError, StateMachineError,
};

use super::{
    DialecticSession, DisputeType, Resolution, ResolutionAction, SessionState, SynthesisRound,
};

/// What a submission did to the session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Non-terminal progress
    Progressed,
    /// Agreement reached; the resolution must be executed exactly once
    Resolved(Resolution),
    /// Synthesis rounds exhausted without agreement
    Blocked,
    /// Antithesis wait exceeded
    TimedOut,
}

/// In-process engine over the per-session files
pub struct DialecticEngine {
    sessions: DashMap<String, DialecticSession>,
    store: FileStore,
    cfg: DialecticConfig,
}

impl DialecticEngine {
    /// Load every persisted session record.
    pub fn load(store: FileStore, cfg: DialecticConfig) -> Result<Self, RuntimeError> {
        let sessions = DashMap::new();
        for id in store.list_session_ids()? {
            if let Some(session) =
                store.read_json::<DialecticSession>(&store.session_path(&id))?
            {
                sessions.insert(session.session_id.clone(), session);
            }
        }
        tracing::info!(sessions = sessions.len(), "dialectic engine loaded");
        Ok(Self {
            sessions,
            store,
            cfg,
        })
    }

    fn persist(&self, session: &DialecticSession) -> Result<(), RuntimeError> {
        self.store
            .write_json(&self.store.session_path(&session.session_id), session)?;
        Ok(())
    }

    /// All known sessions (for reviewer selection and workspace health).
    pub fn snapshot_all(&self) -> Vec<DialecticSession> {
        self.sessions.iter().map(|s| s.clone()).collect()
    }

    /// Open a session. A paused agent can only be party to one live
    /// session at a time.
    pub fn create_session(
        &self,
        paused_agent_id: AgentId,
        reviewer_agent_id: AgentId,
        discovery_id: Option<String>,
        dispute_type: Option<DisputeType>,
        self_recovery: bool,
    ) -> Result<DialecticSession, RuntimeError> {
        if let Some(live) = self
            .sessions
            .iter()
            .find(|s| s.paused_agent_id == paused_agent_id && !s.state.is_terminal())
        {
            return Err(StateMachineError::WrongSessionState {
                session_id: live.session_id.clone(),
                expected: "no live session for this agent".to_string(),
                actual: live.state.as_str().to_string(),
            }
            .into());
        }

        let session = DialecticSession::new(
            paused_agent_id,
            reviewer_agent_id,
            discovery_id,
            dispute_type,
            self_recovery,
        );
        self.persist(&session)?;
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        tracing::info!(
            session_id = %session.session_id,
            paused = %session.paused_agent_id,
            reviewer = %session.reviewer_agent_id,
            self_recovery,
            "dialectic session opened"
        );
        Ok(session)
    }

    /// Promote an overdue awaiting_antithesis session to timed_out.
    /// Returns true when the state changed.
    fn promote_timeout(&self, session: &mut DialecticSession) -> bool {
        if session.state != SessionState::AwaitingAntithesis {
            return false;
        }
        let waited = time::now() - session.last_activity_at;
        let max_wait =
            ChronoDuration::milliseconds(self.cfg.max_antithesis_wait.as_millis() as i64);
        if waited <= max_wait {
            return false;
        }
        session.state = SessionState::TimedOut;
        session.resolution = Some(Resolution {
            action: ResolutionAction::Escalate,
            conditions: Vec::new(),
            notes: "antithesis wait exceeded".to_string(),
        });
        tracing::warn!(session_id = %session.session_id, "dialectic session timed out");
        true
    }

    /// Fetch a session, applying timeout promotion on access.
    pub fn get(&self, session_id: &str) -> Result<(DialecticSession, SessionEvent), RuntimeError> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RuntimeError::from(NotFoundError::Session(session_id.to_string())))?;
        if self.promote_timeout(&mut entry) {
            let snapshot = entry.clone();
            drop(entry);
            self.persist(&snapshot)?;
            return Ok((snapshot, SessionEvent::TimedOut));
        }
        Ok((entry.clone(), SessionEvent::Progressed))
    }

    fn expect_state(
        session: &DialecticSession,
        expected: SessionState,
    ) -> Result<(), RuntimeError> {
        if session.state != expected {
            return Err(StateMachineError::WrongSessionState {
                session_id: session.session_id.clone(),
                expected: expected.as_str().to_string(),
                actual: session.state.as_str().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Thesis from the paused party; moves to awaiting_antithesis.
    pub fn submit_thesis(
        &self,
        session_id: &str,
        author: &AgentId,
        content: String,
    ) -> Result<DialecticSession, RuntimeError> {
        let snapshot = {
            let mut entry = self.sessions.get_mut(session_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Session(session_id.to_string()))
            })?;
            Self::expect_state(&entry, SessionState::AwaitingThesis)?;
            if author != &entry.paused_agent_id {
                return Err(AuthError::CrossAgent {
                    reason: "only the paused agent submits the thesis".to_string(),
                }
                .into());
            }
            entry.thesis = Some(content);
            entry.state = SessionState::AwaitingAntithesis;
            entry.touch();
            entry.clone()
        };
        self.persist(&snapshot)?;
        Ok(snapshot)
    }

    /// Antithesis from the reviewer; moves to negotiating. Applies the
    /// timeout bound first.
    pub fn submit_antithesis(
        &self,
        session_id: &str,
        author: &AgentId,
        content: String,
    ) -> Result<(DialecticSession, SessionEvent), RuntimeError> {
        let (snapshot, event) = {
            let mut entry = self.sessions.get_mut(session_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Session(session_id.to_string()))
            })?;
            if self.promote_timeout(&mut entry) {
                let snapshot = entry.clone();
                drop(entry);
                self.persist(&snapshot)?;
                return Ok((snapshot, SessionEvent::TimedOut));
            }
            Self::expect_state(&entry, SessionState::AwaitingAntithesis)?;
            if author != &entry.reviewer_agent_id {
                return Err(AuthError::CrossAgent {
                    reason: "only the assigned reviewer submits the antithesis".to_string(),
                }
                .into());
            }
            entry.antithesis = Some(content);
            entry.state = SessionState::Negotiating;
            entry.touch();
            (entry.clone(), SessionEvent::Progressed)
        };
        self.persist(&snapshot)?;
        Ok((snapshot, event))
    }

    /// One synthesis round from either party. Agreement resolves the
    /// session; exhausting the round bound blocks it.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_synthesis(
        &self,
        session_id: &str,
        author: &AgentId,
        content: String,
        agrees: bool,
        action: Option<ResolutionAction>,
        conditions: Vec<String>,
        notes: Option<String>,
    ) -> Result<(DialecticSession, SessionEvent), RuntimeError> {
        let (snapshot, event) = {
            let mut entry = self.sessions.get_mut(session_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Session(session_id.to_string()))
            })?;
            Self::expect_state(&entry, SessionState::Negotiating)?;
            if author != &entry.paused_agent_id && author != &entry.reviewer_agent_id {
                return Err(AuthError::CrossAgent {
                    reason: "only session parties submit syntheses".to_string(),
                }
                .into());
            }

            entry.synthesis_rounds.push(SynthesisRound {
                author: author.clone(),
                agrees,
                content,
                timestamp: time::now(),
            });
            entry.touch();

            let event = if agrees {
                let resolution = Resolution {
                    action: action.unwrap_or(ResolutionAction::Resume),
                    conditions,
                    notes: notes.unwrap_or_default(),
                };
                entry.state = SessionState::Resolved;
                entry.resolution = Some(resolution.clone());
                SessionEvent::Resolved(resolution)
            } else if entry.synthesis_rounds.len() >= self.cfg.max_synthesis_rounds {
                entry.state = SessionState::Blocked;
                SessionEvent::Blocked
            } else {
                SessionEvent::Progressed
            };
            (entry.clone(), event)
        };
        self.persist(&snapshot)?;
        Ok((snapshot, event))
    }
}
