//! Per-agent thermodynamic state and its parallel histories

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DynamicsConfig;
use crate::types::{time, DecisionAction};

/// Parallel history arrays. Every array has exactly `update_count` entries
/// in memory; they are trimmed to the configured cap at serialization time
/// only.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateHistory {
    pub e: Vec<f64>,
    pub i: Vec<f64>,
    pub s: Vec<f64>,
    pub v: Vec<f64>,
    pub coherence: Vec<f64>,
    pub attention: Vec<f64>,
    pub decision: Vec<DecisionAction>,
    pub lambda1: Vec<f64>,
    #[serde(with = "time::iso_vec")]
    pub timestamps: Vec<DateTime<Utc>>,
}

impl StateHistory {
    pub fn len(&self) -> usize {
        self.e.len()
    }

    pub fn is_empty(&self) -> bool {
        self.e.is_empty()
    }

    /// All parallel arrays must stay the same length.
    pub fn is_consistent(&self) -> bool {
        let n = self.e.len();
        self.i.len() == n
            && self.s.len() == n
            && self.v.len() == n
            && self.coherence.len() == n
            && self.attention.len() == n
            && self.decision.len() == n
            && self.lambda1.len() == n
            && self.timestamps.len() == n
    }

    /// Drop all but the most recent `cap` entries from every array.
    pub fn trim_to(&mut self, cap: usize) {
        let n = self.len();
        if n <= cap {
            return;
        }
        let cut = n - cap;
        self.e.drain(..cut);
        self.i.drain(..cut);
        self.s.drain(..cut);
        self.v.drain(..cut);
        self.coherence.drain(..cut);
        self.attention.drain(..cut);
        self.decision.drain(..cut);
        self.lambda1.drain(..cut);
        self.timestamps.drain(..cut);
    }

    /// Mean of the last `n` entries of an array, `None` when empty.
    pub fn mean_tail(values: &[f64], n: usize) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let tail = &values[values.len().saturating_sub(n)..];
        Some(tail.iter().sum::<f64>() / tail.len() as f64)
    }
}

/// One appended history entry
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub e: f64,
    pub i: f64,
    pub s: f64,
    pub v: f64,
    pub coherence: f64,
    pub attention: f64,
    pub decision: DecisionAction,
    pub lambda1: f64,
    pub timestamp: DateTime<Utc>,
}

/// Per-agent thermodynamic state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermoState {
    pub e: f64,
    pub i: f64,
    pub s: f64,
    pub v: f64,
    pub lambda1: f64,
    /// Integrated virtual time
    pub time: f64,
    pub update_count: u64,
    /// PI controller accumulator
    pub pi_integral: f64,
    /// phi component of the most recent attention blend
    #[serde(default)]
    pub last_phi: f64,
    pub history: StateHistory,
}

impl ThermoState {
    /// Fresh state for a newly created agent.
    pub fn new(params: &DynamicsConfig) -> Self {
        Self {
            e: params.initial_e,
            i: params.initial_i,
            s: params.initial_s,
            v: params.initial_v,
            lambda1: params.lambda_init,
            time: 0.0,
            update_count: 0,
            pi_integral: 0.0,
            last_phi: 0.0,
            history: StateHistory::default(),
        }
    }

    /// Append one entry to every history array and advance the counters.
    pub fn push(&mut self, entry: HistoryEntry, dt: f64) {
        self.e = entry.e;
        self.i = entry.i;
        self.s = entry.s;
        self.v = entry.v;
        self.lambda1 = entry.lambda1;
        self.history.e.push(entry.e);
        self.history.i.push(entry.i);
        self.history.s.push(entry.s);
        self.history.v.push(entry.v);
        self.history.coherence.push(entry.coherence);
        self.history.attention.push(entry.attention);
        self.history.decision.push(entry.decision);
        self.history.lambda1.push(entry.lambda1);
        self.history.timestamps.push(entry.timestamp);
        self.update_count += 1;
        self.time += dt;
    }

    /// Most recent coherence value, 1.0 at V=0 before any update.
    pub fn current_coherence(&self, sigma: f64) -> f64 {
        self.history
            .coherence
            .last()
            .copied()
            .unwrap_or_else(|| crate::dynamics::coherence(self.v, sigma))
    }

    /// Clone with histories trimmed for persistence.
    pub fn for_serialization(&self, cap: usize) -> Self {
        let mut copy = self.clone();
        copy.history.trim_to(cap);
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(decision: DecisionAction) -> HistoryEntry {
        HistoryEntry {
            e: 0.8,
            i: 0.8,
            s: 0.2,
            v: 0.0,
            coherence: 1.0,
            attention: 0.1,
            decision,
            lambda1: 0.125,
            timestamp: time::now(),
        }
    }

    #[test]
    fn histories_stay_parallel() {
        let mut state = ThermoState::new(&DynamicsConfig::default());
        for _ in 0..25 {
            state.push(entry(DecisionAction::Proceed), 0.1);
        }
        assert_eq!(state.update_count, 25);
        assert_eq!(state.history.len(), 25);
        assert!(state.history.is_consistent());
        assert!((state.time - 2.5).abs() < 1e-9);
    }

    #[test]
    fn serialization_cap_leaves_memory_untrimmed() {
        let mut state = ThermoState::new(&DynamicsConfig::default());
        for _ in 0..150 {
            state.push(entry(DecisionAction::Proceed), 0.1);
        }
        let capped = state.for_serialization(100);
        assert_eq!(capped.history.len(), 100);
        assert!(capped.history.is_consistent());
        assert_eq!(state.history.len(), 150);
        assert_eq!(capped.update_count, 150);
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = ThermoState::new(&DynamicsConfig::default());
        state.push(entry(DecisionAction::Pause), 0.1);
        let json = serde_json::to_string(&state).unwrap();
        let back: ThermoState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.update_count, 1);
        assert_eq!(back.history.decision, vec![DecisionAction::Pause]);
        assert!(back.history.is_consistent());
    }
}
