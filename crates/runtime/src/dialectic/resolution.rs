//! Resolution execution and condition enforcement
//!
//! A terminal session outcome is applied exactly once: recognized
//! conditions take effect, the paused agent transitions, and a lifecycle
//! event names the session. Conditions the parser does not recognize are
//! stored verbatim for later inspection and never fail the resolution.

use parking_lot::RwLock;

use crate::config::ThresholdConfig;
use crate::knowledge::{DiscoveryStatus, KnowledgeGraph};
use crate::registry::MetadataRegistry;
use crate::types::{AgentStatus, RuntimeError};

use super::{DialecticSession, ResolutionAction, SessionEvent};

/// Conditions the enforcement layer understands
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizedCondition {
    /// Tighten the caution bands by ten percent
    LowerThresholds,
    /// Clamp the complexity input for this agent
    CapComplexity(f64),
    /// Attach a tag to the agent
    Tag(String),
}

/// Parse one free-form condition string. Matching is case-insensitive on
/// the prefix; anything unparseable yields `None`.
pub fn parse_condition(raw: &str) -> Option<RecognizedCondition> {
    let lower = raw.trim().to_lowercase();
    if lower == "lower thresholds" {
        return Some(RecognizedCondition::LowerThresholds);
    }
    if let Some(rest) = lower
        .strip_prefix("cap complexity <=")
        .or_else(|| lower.strip_prefix("cap complexity at"))
        .or_else(|| lower.strip_prefix("cap complexity"))
    {
        if let Ok(value) = rest.trim().parse::<f64>() {
            if (0.0..=1.0).contains(&value) {
                return Some(RecognizedCondition::CapComplexity(value));
            }
        }
        return None;
    }
    if let Some(rest) = raw.trim().strip_prefix("tag:").or_else(|| raw.trim().strip_prefix("tag ")) {
        let tag = rest.trim();
        if !tag.is_empty() {
            return Some(RecognizedCondition::Tag(tag.to_string()));
        }
    }
    None
}

/// Tag prefix carrying a complexity cap; the update path reads it back.
pub const COMPLEXITY_CAP_TAG: &str = "complexity-cap:";

/// Extract a complexity cap from an agent's tags, if one was imposed.
pub fn complexity_cap_from_tags(tags: &[String]) -> Option<f64> {
    tags.iter()
        .filter_map(|t| t.strip_prefix(COMPLEXITY_CAP_TAG))
        .filter_map(|v| v.parse::<f64>().ok())
        .fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        })
}

/// Applies terminal session outcomes against the registry, graph, and
/// live thresholds.
pub struct ResolutionExecutor<'a> {
    pub registry: &'a MetadataRegistry,
    pub graph: &'a KnowledgeGraph,
    pub thresholds: &'a RwLock<ThresholdConfig>,
}

impl ResolutionExecutor<'_> {
    /// Apply a terminal event. Returns the human-readable list of applied
    /// effects.
    pub fn execute(
        &self,
        session: &DialecticSession,
        event: &SessionEvent,
    ) -> Result<Vec<String>, RuntimeError> {
        match event {
            SessionEvent::Resolved(resolution) => self.execute_resolved(session, resolution),
            SessionEvent::Blocked => self.execute_blocked(session),
            SessionEvent::TimedOut => self.execute_timed_out(session),
            SessionEvent::Progressed => Ok(Vec::new()),
        }
    }

    fn execute_resolved(
        &self,
        session: &DialecticSession,
        resolution: &super::Resolution,
    ) -> Result<Vec<String>, RuntimeError> {
        let mut applied = Vec::new();
        let agent_id = &session.paused_agent_id;

        for raw in &resolution.conditions {
            match parse_condition(raw) {
                Some(RecognizedCondition::LowerThresholds) => {
                    let mut cfg = self.thresholds.write();
                    cfg.risk_revise = (cfg.risk_revise * 0.9).max(cfg.risk_approve);
                    cfg.risk_approve *= 0.9;
                    applied.push("lowered caution thresholds by 10%".to_string());
                }
                Some(RecognizedCondition::CapComplexity(cap)) => {
                    self.registry.add_tag(
                        agent_id,
                        format!("{COMPLEXITY_CAP_TAG}{cap}"),
                    )?;
                    applied.push(format!("capped complexity at {cap}"));
                }
                Some(RecognizedCondition::Tag(tag)) => {
                    self.registry.add_tag(agent_id, tag.clone())?;
                    applied.push(format!("tagged agent with {tag}"));
                }
                None => {
                    self.registry.append_event(
                        agent_id,
                        "unenforced condition",
                        Some(raw.clone()),
                    )?;
                    applied.push(format!("stored condition verbatim: {raw}"));
                }
            }
        }

        // Discovery disputes settle the discovery itself.
        if let Some(discovery_id) = &session.discovery_id {
            if resolution.action == ResolutionAction::Resume {
                self.graph.update_status(
                    discovery_id,
                    DiscoveryStatus::Resolved,
                    Some(format!(
                        "resolved via dialectic session {}",
                        session.session_id
                    )),
                    None,
                )?;
                applied.push(format!("marked discovery {discovery_id} resolved"));
            }
        }

        let agent_paused = self
            .registry
            .get(agent_id)
            .map(|r| r.status == AgentStatus::Paused)
            .unwrap_or(false);

        match resolution.action {
            ResolutionAction::Resume if agent_paused => {
                self.registry.resume_from_pause(
                    agent_id,
                    &format!("resumed (dialectic {})", session.session_id),
                    (!resolution.notes.is_empty()).then(|| resolution.notes.clone()),
                )?;
                applied.push("agent resumed".to_string());
            }
            ResolutionAction::Block if agent_paused => {
                self.registry.archive_from_pause(
                    agent_id,
                    &format!("archived (dialectic {})", session.session_id),
                    (!resolution.notes.is_empty()).then(|| resolution.notes.clone()),
                )?;
                applied.push("agent archived".to_string());
            }
            ResolutionAction::Escalate => {
                self.registry.append_event(
                    agent_id,
                    "dialectic escalated",
                    Some(session.session_id.clone()),
                )?;
                applied.push("escalated for external review".to_string());
            }
            _ => {}
        }

        tracing::info!(
            session_id = %session.session_id,
            agent_id = %agent_id,
            action = ?resolution.action,
            effects = applied.len(),
            "dialectic resolution applied"
        );
        Ok(applied)
    }

    fn execute_blocked(&self, session: &DialecticSession) -> Result<Vec<String>, RuntimeError> {
        let mut applied = Vec::new();
        if let Some(discovery_id) = &session.discovery_id {
            self.graph.update_status(
                discovery_id,
                DiscoveryStatus::Open,
                Some(format!(
                    "verified correct (dialectic session {} blocked)",
                    session.session_id
                )),
                None,
            )?;
            applied.push(format!("discovery {discovery_id} reverted to open"));
        }
        if self.registry.contains(&session.paused_agent_id) {
            self.registry.append_event(
                &session.paused_agent_id,
                "dialectic blocked",
                Some(session.session_id.clone()),
            )?;
        }
        Ok(applied)
    }

    fn execute_timed_out(&self, session: &DialecticSession) -> Result<Vec<String>, RuntimeError> {
        if self.registry.contains(&session.paused_agent_id) {
            self.registry.append_event(
                &session.paused_agent_id,
                "dialectic timed out (escalate)",
                Some(session.session_id.clone()),
            )?;
        }
        Ok(vec!["timed out; escalated".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parser_recognizes_the_documented_grammar() {
        assert_eq!(
            parse_condition("Lower Thresholds"),
            Some(RecognizedCondition::LowerThresholds)
        );
        assert_eq!(
            parse_condition("cap complexity <= 0.5"),
            Some(RecognizedCondition::CapComplexity(0.5))
        );
        assert_eq!(
            parse_condition("cap complexity at 0.3"),
            Some(RecognizedCondition::CapComplexity(0.3))
        );
        assert_eq!(
            parse_condition("tag: needs-supervision"),
            Some(RecognizedCondition::Tag("needs-supervision".to_string()))
        );
        assert_eq!(parse_condition("reduce blast radius"), None);
        assert_eq!(parse_condition("cap complexity <= 7"), None);
    }

    #[test]
    fn complexity_cap_reads_the_tightest_tag() {
        let tags = vec![
            "pioneer".to_string(),
            "complexity-cap:0.6".to_string(),
            "complexity-cap:0.4".to_string(),
        ];
        assert_eq!(complexity_cap_from_tags(&tags), Some(0.4));
        assert_eq!(complexity_cap_from_tags(&["plain".to_string()]), None);
    }
}
