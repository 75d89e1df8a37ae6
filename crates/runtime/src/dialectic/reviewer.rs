//! Reviewer selection for dialectic sessions
//!
//! Pure scoring over candidate profiles; the caller supplies the metric
//! values so selection stays independent of monitor internals. When no
//! candidate survives the exclusions the session is promoted to
//! self-recovery.

use std::collections::HashSet;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::types::{AgentId, AgentMetadata, AgentStatus};

use super::DialecticSession;

/// One candidate with the metrics that drive scoring
#[derive(Debug, Clone)]
pub struct CandidateProfile {
    pub meta: AgentMetadata,
    pub coherence: f64,
    pub mean_attention: f64,
}

fn tag_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a: HashSet<String> = a.iter().map(|t| t.to_lowercase()).collect();
    let b: HashSet<String> = b.iter().map(|t| t.to_lowercase()).collect();
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    intersection / union
}

/// Pick the best available reviewer for `paused`, or `None` when the
/// session should fall back to self-recovery.
///
/// Exclusions: the paused agent itself, parties of any live session
/// (collusion avoidance), reviewers of this same agent within the
/// exclusion window, deleted agents, and agents that are neither active
/// nor waiting for input.
pub fn select_reviewer(
    paused: &AgentMetadata,
    candidates: &[CandidateProfile],
    sessions: &[DialecticSession],
    exclusion_window: ChronoDuration,
    now: DateTime<Utc>,
) -> Option<AgentId> {
    let busy: HashSet<&AgentId> = sessions
        .iter()
        .filter(|s| !s.state.is_terminal())
        .flat_map(|s| [&s.paused_agent_id, &s.reviewer_agent_id])
        .collect();

    let recently_reviewed_this: HashSet<&AgentId> = sessions
        .iter()
        .filter(|s| s.paused_agent_id == paused.agent_id)
        .filter(|s| now - s.created_at <= exclusion_window)
        .map(|s| &s.reviewer_agent_id)
        .collect();

    let review_count = |id: &AgentId| {
        sessions
            .iter()
            .filter(|s| &s.reviewer_agent_id == id)
            .filter(|s| now - s.created_at <= exclusion_window)
            .count()
    };

    candidates
        .iter()
        .filter(|c| c.meta.agent_id != paused.agent_id)
        .filter(|c| {
            matches!(
                c.meta.status,
                AgentStatus::Active | AgentStatus::WaitingInput
            )
        })
        .filter(|c| !busy.contains(&c.meta.agent_id))
        .filter(|c| !recently_reviewed_this.contains(&c.meta.agent_id))
        .map(|c| {
            let score = 0.4 * c.coherence
                + 0.4 * (1.0 - c.mean_attention)
                + 0.2 * tag_overlap(&c.meta.tags, &paused.tags);
            (c, score)
        })
        .max_by(|(a, sa), (b, sb)| {
            sa.total_cmp(sb).then_with(|| {
                // Lower recent-review load wins a tie.
                review_count(&b.meta.agent_id).cmp(&review_count(&a.meta.agent_id))
            })
        })
        .map(|(c, _)| c.meta.agent_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::time;

    fn meta(id: &str, status: AgentStatus, tags: &[&str]) -> AgentMetadata {
        let mut m = AgentMetadata::new(AgentId::from(id), String::new());
        m.status = status;
        m.tags = tags.iter().map(|t| t.to_string()).collect();
        m
    }

    fn profile(id: &str, coherence: f64, attention: f64, tags: &[&str]) -> CandidateProfile {
        CandidateProfile {
            meta: meta(id, AgentStatus::Active, tags),
            coherence,
            mean_attention: attention,
        }
    }

    #[test]
    fn excludes_self_and_inactive() {
        let paused = meta("down", AgentStatus::Paused, &[]);
        let candidates = vec![
            profile("down", 0.9, 0.1, &[]),
            CandidateProfile {
                meta: meta("archived", AgentStatus::Archived, &[]),
                coherence: 0.9,
                mean_attention: 0.1,
            },
        ];
        let pick = select_reviewer(
            &paused,
            &candidates,
            &[],
            ChronoDuration::hours(24),
            time::now(),
        );
        assert!(pick.is_none());
    }

    #[test]
    fn prefers_calm_coherent_reviewers_with_shared_expertise() {
        let paused = meta("down", AgentStatus::Paused, &["storage"]);
        let candidates = vec![
            profile("frazzled", 0.5, 0.9, &["storage"]),
            profile("calm", 0.9, 0.1, &["storage"]),
            profile("unrelated", 0.9, 0.1, &["frontend"]),
        ];
        let pick = select_reviewer(
            &paused,
            &candidates,
            &[],
            ChronoDuration::hours(24),
            time::now(),
        )
        .unwrap();
        assert_eq!(pick.as_str(), "calm");
    }

    #[test]
    fn recent_reviewer_of_same_agent_is_excluded() {
        let paused = meta("down", AgentStatus::Paused, &[]);
        let mut session = DialecticSession::new(
            AgentId::from("down"),
            AgentId::from("recent"),
            None,
            None,
            false,
        );
        session.state = super::super::SessionState::Resolved;

        let candidates = vec![profile("recent", 0.9, 0.1, &[]), profile("fresh", 0.7, 0.2, &[])];
        let pick = select_reviewer(
            &paused,
            &candidates,
            &[session],
            ChronoDuration::hours(24),
            time::now(),
        )
        .unwrap();
        assert_eq!(pick.as_str(), "fresh");
    }

    #[test]
    fn parties_of_live_sessions_are_excluded() {
        let paused = meta("down", AgentStatus::Paused, &[]);
        let live = DialecticSession::new(
            AgentId::from("other-paused"),
            AgentId::from("busy"),
            None,
            None,
            false,
        );
        let candidates = vec![profile("busy", 0.95, 0.05, &[]), profile("free", 0.6, 0.3, &[])];
        let pick = select_reviewer(
            &paused,
            &candidates,
            &[live],
            ChronoDuration::hours(24),
            time::now(),
        )
        .unwrap();
        assert_eq!(pick.as_str(), "free");
    }
}
