//! Loop detection over recent update timing and decisions
//!
//! Six patterns evaluated on every update arrival, before integration.
//! First match wins and puts the agent into a cooldown; rejected updates
//! never reach the history arrays. Cooldowns expire passively.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;

use crate::types::DecisionAction;

/// A matched loop pattern
#[derive(Debug, Clone, PartialEq)]
pub struct LoopMatch {
    pub pattern: &'static str,
    pub cooldown_seconds: f64,
}

struct WindowCounts {
    updates: usize,
    pauses: usize,
}

/// Count prior updates (and their pause decisions) inside `window_secs` of
/// `now`, plus one for the arrival being evaluated.
fn counts_within(
    now: DateTime<Utc>,
    timestamps: &VecDeque<DateTime<Utc>>,
    decisions: &VecDeque<DecisionAction>,
    window_secs: f64,
) -> WindowCounts {
    let window = ChronoDuration::milliseconds((window_secs * 1000.0) as i64);
    let mut updates = 1; // the current arrival
    let mut pauses = 0;

    // Timestamps and decisions are appended together; walk matching tails.
    let pairs = timestamps.len().min(decisions.len());
    for idx in 0..timestamps.len() {
        let ts = timestamps[timestamps.len() - 1 - idx];
        if now - ts > window {
            break;
        }
        updates += 1;
        if idx < pairs && decisions[decisions.len() - 1 - idx] == DecisionAction::Pause {
            pauses += 1;
        }
    }

    WindowCounts { updates, pauses }
}

fn tail_all(decisions: &VecDeque<DecisionAction>, n: usize, action: DecisionAction) -> bool {
    decisions.len() >= n && decisions.iter().rev().take(n).all(|d| *d == action)
}

/// Evaluate the patterns for an update arriving at `now`.
///
/// `timestamps` and `decisions` hold the agent's accepted-update rings; the
/// arrival being judged is not yet recorded in either.
pub fn detect(
    now: DateTime<Utc>,
    timestamps: &VecDeque<DateTime<Utc>>,
    decisions: &VecDeque<DecisionAction>,
) -> Option<LoopMatch> {
    // P1 rapid-fire: two updates within 0.3s.
    if counts_within(now, timestamps, decisions, 0.3).updates >= 2 {
        return Some(LoopMatch {
            pattern: "rapid-fire",
            cooldown_seconds: 5.0,
        });
    }

    // P2 recursive pause: three updates in 10s with two pauses.
    let w10 = counts_within(now, timestamps, decisions, 10.0);
    if w10.updates >= 3 && w10.pauses >= 2 {
        return Some(LoopMatch {
            pattern: "recursive-pause",
            cooldown_seconds: 15.0,
        });
    }

    // P3 rapid with pauses: four updates in 5s with a pause.
    let w5 = counts_within(now, timestamps, decisions, 5.0);
    if w5.updates >= 4 && w5.pauses >= 1 {
        return Some(LoopMatch {
            pattern: "rapid-with-pauses",
            cooldown_seconds: 15.0,
        });
    }

    // P4 decision loop: five straight pauses or fifteen straight proceeds.
    if tail_all(decisions, 5, DecisionAction::Pause)
        || tail_all(decisions, 15, DecisionAction::Proceed)
    {
        return Some(LoopMatch {
            pattern: "decision-loop",
            cooldown_seconds: 30.0,
        });
    }

    // P5 slow stuck: three updates in 60s with a pause.
    let w60 = counts_within(now, timestamps, decisions, 60.0);
    if w60.updates >= 3 && w60.pauses >= 1 {
        return Some(LoopMatch {
            pattern: "slow-stuck",
            cooldown_seconds: 30.0,
        });
    }

    // P6 extended: five updates in 120s with a pause.
    let w120 = counts_within(now, timestamps, decisions, 120.0);
    if w120.updates >= 5 && w120.pauses >= 1 {
        return Some(LoopMatch {
            pattern: "extended",
            cooldown_seconds: 30.0,
        });
    }

    None
}
