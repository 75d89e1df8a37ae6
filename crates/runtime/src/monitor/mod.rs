//! Per-agent monitor: dynamics integration, classification, health bands
//!
//! One `Monitor` wraps one agent's thermodynamic state. `process_update`
//! is the only mutating entry point; `simulate` runs the identical
//! computation without committing anything. Callers hold the agent lock
//! while a monitor mutates, so the monitor itself carries no locking.

use serde::{Deserialize, Serialize};

use crate::config::{ControllerConfig, DynamicsConfig, ThresholdConfig};
use crate::dynamics::{self, controller, StateVector};
use crate::types::{
    time, DecisionAction, HealthStatus, RuntimeError, ValidationError, Verdict,
};

pub mod attention;
pub mod loop_detector;
pub mod state;

pub use state::{HistoryEntry, StateHistory, ThermoState};

use attention::{analyze_text, attention_score, derive_complexity};

/// Classification outcome for one update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    pub verdict: Verdict,
    pub reason: String,
    pub guidance: String,
}

/// Point-in-time view of the thermodynamic state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub e: f64,
    pub i: f64,
    pub s: f64,
    pub v: f64,
    pub coherence: f64,
    pub lambda1: f64,
    pub update_count: u64,
    pub time: f64,
}

/// Sampling-parameter suggestion derived from the verdict
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
}

impl SamplingParams {
    fn for_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Safe => Self {
                temperature: 0.7,
                top_p: 0.95,
            },
            Verdict::Caution => Self {
                temperature: 0.5,
                top_p: 0.9,
            },
            Verdict::HighRisk => Self {
                temperature: 0.2,
                top_p: 0.8,
            },
        }
    }
}

/// Everything `process_update` reports back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub snapshot: StateSnapshot,
    pub decision: Decision,
    pub attention: f64,
    pub phi: f64,
    /// Deprecated alias for `attention`, kept until the next major version
    pub risk_score: f64,
    pub complexity_used: f64,
    pub sampling_params: SamplingParams,
}

/// Aggregate metrics for `get_governance_metrics`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub e: f64,
    pub i: f64,
    pub s: f64,
    pub v: f64,
    pub coherence: f64,
    pub attention: f64,
    pub phi: f64,
    /// Deprecated alias for `attention`
    pub risk_score: f64,
    pub current_risk: f64,
    pub mean_risk: f64,
    pub verdict: Verdict,
    pub health_status: HealthStatus,
    pub lambda1: f64,
    pub update_count: u64,
    pub decision_statistics: DecisionStatistics,
    pub void_threshold_effective: f64,
}

/// Proceed/pause counts over the retained history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionStatistics {
    pub proceed: usize,
    pub pause: usize,
}

struct Evaluation {
    entry: HistoryEntry,
    pi_integral: f64,
    outcome: UpdateOutcome,
}

/// Per-agent monitor wrapping the dynamics engine
#[derive(Debug, Clone)]
pub struct Monitor {
    pub state: ThermoState,
    params: DynamicsConfig,
    controller: ControllerConfig,
}

impl Monitor {
    pub fn new(params: DynamicsConfig, controller: ControllerConfig) -> Self {
        Self {
            state: ThermoState::new(&params),
            params,
            controller,
        }
    }

    /// Rehydrate a monitor from a persisted state.
    pub fn from_state(
        state: ThermoState,
        params: DynamicsConfig,
        controller: ControllerConfig,
    ) -> Self {
        Self {
            state,
            params,
            controller,
        }
    }

    pub fn params(&self) -> &DynamicsConfig {
        &self.params
    }

    /// Void threshold in effect: the configured floor before warm-up, then
    /// adaptive over the recent |V| distribution.
    pub fn effective_void_threshold(&self, thresholds: &ThresholdConfig) -> f64 {
        if self.state.update_count <= self.controller.warmup_updates {
            return thresholds.void_threshold;
        }
        let tail: Vec<f64> = self
            .state
            .history
            .v
            .iter()
            .rev()
            .take(50)
            .map(|v| v.abs())
            .collect();
        if tail.is_empty() {
            return thresholds.void_threshold;
        }
        let mean = tail.iter().sum::<f64>() / tail.len() as f64;
        let var = tail.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / tail.len() as f64;
        thresholds
            .void_threshold
            .max(mean + 2.0 * var.sqrt())
            .min(0.5)
    }

    fn classify(
        &self,
        thresholds: &ThresholdConfig,
        coherence: f64,
        v: f64,
        attention: f64,
    ) -> Decision {
        let void_threshold = self.effective_void_threshold(thresholds);

        if coherence < thresholds.coherence_critical {
            return Decision {
                action: DecisionAction::Pause,
                verdict: Verdict::HighRisk,
                reason: format!(
                    "coherence {coherence:.3} fell below the critical floor {:.2}",
                    thresholds.coherence_critical
                ),
                guidance: "Coherence has dropped and a short reset will help. Let's take a \
                           breather; a dialectic review can bring things back on track."
                    .to_string(),
            };
        }
        if v.abs() > void_threshold {
            return Decision {
                action: DecisionAction::Pause,
                verdict: Verdict::HighRisk,
                reason: format!(
                    "void integral |V|={:.3} beyond threshold {void_threshold:.3}",
                    v.abs()
                ),
                guidance: "The session has drifted further than usual. Pausing here is the \
                           healthy move; recovery is one dialectic away."
                    .to_string(),
            };
        }
        if attention > thresholds.risk_revise {
            return Decision {
                action: DecisionAction::Proceed,
                verdict: Verdict::Caution,
                reason: format!(
                    "attention {attention:.3} above the revise band {:.2}",
                    thresholds.risk_revise
                ),
                guidance: "Complexity is building — let's pause and regroup before the next \
                           step."
                    .to_string(),
            };
        }
        if attention > thresholds.risk_approve {
            return Decision {
                action: DecisionAction::Proceed,
                verdict: Verdict::Caution,
                reason: format!(
                    "attention {attention:.3} above the approve band {:.2}",
                    thresholds.risk_approve
                ),
                guidance: "Workload is trending denser than usual; simplifying the next step \
                           will keep things smooth."
                    .to_string(),
            };
        }
        Decision {
            action: DecisionAction::Proceed,
            verdict: Verdict::Safe,
            reason: format!("attention {attention:.3} within the safe band"),
            guidance: "Looking steady — keep going.".to_string(),
        }
    }

    fn evaluate(
        &self,
        response_text: &str,
        complexity: Option<f64>,
        drift: Option<[f64; 3]>,
        confidence: Option<f64>,
        thresholds: &ThresholdConfig,
    ) -> Result<Evaluation, RuntimeError> {
        if response_text.len() > thresholds.max_response_bytes {
            return Err(ValidationError::TooLarge {
                field: "response_text".to_string(),
                limit: thresholds.max_response_bytes,
            }
            .into());
        }

        let signals = analyze_text(response_text);
        let coherence_history = &self.state.history.coherence;
        let coherence_delta = match coherence_history.len() {
            0 | 1 => 0.0,
            n => coherence_history[n - 1] - coherence_history[n - 2],
        };
        let complexity_used = derive_complexity(&signals, coherence_delta, complexity);

        // Controller runs on the ordinal of the update being processed,
        // against the coherence history accumulated so far.
        let ordinal = self.state.update_count + 1;
        let (lambda1, pi_integral) = match controller::adjust(
            &self.controller,
            (self.params.lambda_min, self.params.lambda_max),
            self.state.lambda1,
            self.state.pi_integral,
            coherence_history,
            ordinal,
        ) {
            Some(adj) => (adj.lambda1, adj.pi_integral),
            None => (self.state.lambda1, self.state.pi_integral),
        };

        let drift = drift.unwrap_or([0.0; 3]);
        let out = dynamics::step(
            &self.params,
            StateVector {
                e: self.state.e,
                i: self.state.i,
                s: self.state.s,
                v: self.state.v,
            },
            lambda1,
            complexity_used,
            drift,
        );

        let breakdown = attention_score(thresholds, &signals, complexity_used, out.coherence);
        let mut decision = self.classify(thresholds, out.coherence, out.state.v, breakdown.attention);
        if let Some(conf) = confidence {
            if conf < 0.3 && decision.action == DecisionAction::Proceed {
                decision.guidance.push_str(
                    " You flagged low confidence; a smaller next step is a fine choice.",
                );
            }
        }

        let entry = HistoryEntry {
            e: out.state.e,
            i: out.state.i,
            s: out.state.s,
            v: out.state.v,
            coherence: out.coherence,
            attention: breakdown.attention,
            decision: decision.action,
            lambda1,
            timestamp: time::now(),
        };

        let outcome = UpdateOutcome {
            snapshot: StateSnapshot {
                e: out.state.e,
                i: out.state.i,
                s: out.state.s,
                v: out.state.v,
                coherence: out.coherence,
                lambda1,
                update_count: ordinal,
                time: self.state.time + self.params.dt,
            },
            decision,
            attention: breakdown.attention,
            phi: breakdown.phi,
            risk_score: breakdown.attention,
            complexity_used,
            sampling_params: SamplingParams::for_verdict(Verdict::Safe),
        };

        Ok(Evaluation {
            entry,
            pi_integral,
            outcome,
        })
    }

    /// Integrate one update and commit it to the histories.
    pub fn process_update(
        &mut self,
        response_text: &str,
        complexity: Option<f64>,
        drift: Option<[f64; 3]>,
        confidence: Option<f64>,
        thresholds: &ThresholdConfig,
    ) -> Result<UpdateOutcome, RuntimeError> {
        let evaluation =
            self.evaluate(response_text, complexity, drift, confidence, thresholds)?;
        let mut outcome = evaluation.outcome;
        outcome.sampling_params = SamplingParams::for_verdict(outcome.decision.verdict);

        self.state.pi_integral = evaluation.pi_integral;
        self.state.last_phi = outcome.phi;
        self.state.push(evaluation.entry, self.params.dt);
        debug_assert!(self.state.history.is_consistent());

        tracing::debug!(
            update_count = self.state.update_count,
            coherence = outcome.snapshot.coherence,
            attention = outcome.attention,
            action = outcome.decision.action.as_str(),
            "processed update"
        );

        Ok(outcome)
    }

    /// Dry-run: identical computation, no mutation.
    pub fn simulate(
        &self,
        response_text: &str,
        complexity: Option<f64>,
        drift: Option<[f64; 3]>,
        confidence: Option<f64>,
        thresholds: &ThresholdConfig,
    ) -> Result<UpdateOutcome, RuntimeError> {
        let evaluation =
            self.evaluate(response_text, complexity, drift, confidence, thresholds)?;
        let mut outcome = evaluation.outcome;
        outcome.sampling_params = SamplingParams::for_verdict(outcome.decision.verdict);
        Ok(outcome)
    }

    /// Reinitialize the thermodynamic state, discarding history.
    pub fn reset(&mut self) {
        self.state = ThermoState::new(&self.params);
    }

    /// Health band over the recent attention history.
    pub fn health_status(&self, thresholds: &ThresholdConfig) -> HealthStatus {
        let history = &self.state.history.attention;
        if history.is_empty() {
            return HealthStatus::Healthy;
        }
        let mean = StateHistory::mean_tail(history, 10).unwrap_or(0.0);
        let coherence = self.state.current_coherence(self.params.sigma);

        if mean < thresholds.healthy_attention && coherence >= thresholds.healthy_coherence {
            HealthStatus::Healthy
        } else if mean < thresholds.moderate_attention {
            HealthStatus::Moderate
        } else {
            HealthStatus::Critical
        }
    }

    /// Aggregate metrics snapshot for reporting tools.
    pub fn metrics(&self, thresholds: &ThresholdConfig) -> MetricsSnapshot {
        let attention = self
            .state
            .history
            .attention
            .last()
            .copied()
            .unwrap_or(0.0);
        let mean_risk =
            StateHistory::mean_tail(&self.state.history.attention, 10).unwrap_or(0.0);
        let coherence = self.state.current_coherence(self.params.sigma);
        let decision = self.classify(thresholds, coherence, self.state.v, attention);
        let stats = DecisionStatistics {
            proceed: self
                .state
                .history
                .decision
                .iter()
                .filter(|d| **d == DecisionAction::Proceed)
                .count(),
            pause: self
                .state
                .history
                .decision
                .iter()
                .filter(|d| **d == DecisionAction::Pause)
                .count(),
        };

        MetricsSnapshot {
            e: self.state.e,
            i: self.state.i,
            s: self.state.s,
            v: self.state.v,
            coherence,
            attention,
            phi: self.state.last_phi,
            risk_score: attention,
            current_risk: attention,
            mean_risk,
            verdict: decision.verdict,
            health_status: self.health_status(thresholds),
            lambda1: self.state.lambda1,
            update_count: self.state.update_count,
            decision_statistics: stats,
            void_threshold_effective: self.effective_void_threshold(thresholds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> Monitor {
        Monitor::new(DynamicsConfig::default(), ControllerConfig::default())
    }

    fn thresholds() -> ThresholdConfig {
        ThresholdConfig::default()
    }

    #[test]
    fn first_simple_update_is_safe() {
        let mut m = monitor();
        let out = m
            .process_update("hello", Some(0.1), None, None, &thresholds())
            .unwrap();
        assert_eq!(out.decision.action, DecisionAction::Proceed);
        assert_eq!(out.decision.verdict, Verdict::Safe);
        assert_eq!(out.snapshot.update_count, 1);
        assert_eq!(m.state.update_count, 1);
        assert_eq!(out.risk_score, out.attention);
        assert!(out.attention < 0.35);
    }

    #[test]
    fn oversized_text_is_rejected_without_history() {
        let mut m = monitor();
        let huge = "x".repeat(50_001);
        let err = m
            .process_update(&huge, None, None, None, &thresholds())
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION");
        assert_eq!(m.state.update_count, 0);
        assert!(m.state.history.is_empty());
    }

    #[test]
    fn simulate_has_no_side_effects_and_is_stable() {
        let mut m = monitor();
        m.process_update("warm up", Some(0.2), None, None, &thresholds())
            .unwrap();
        let before = m.state.update_count;
        let a = m
            .simulate("next step", Some(0.3), None, None, &thresholds())
            .unwrap();
        let b = m
            .simulate("next step", Some(0.3), None, None, &thresholds())
            .unwrap();
        assert_eq!(m.state.update_count, before);
        assert_eq!(a.decision.action, b.decision.action);
        assert_eq!(a.snapshot.e, b.snapshot.e);
    }

    #[test]
    fn void_breach_pauses_with_supportive_guidance() {
        let mut m = monitor();
        let mut tight = thresholds();
        tight.void_threshold = 0.0001;
        // First drifted update unbalances E and I; the second moves V.
        let drift = Some([5.0, 5.0, 5.0]);
        let first = m
            .process_update("drifting", Some(0.5), drift, None, &tight)
            .unwrap();
        assert_eq!(first.decision.action, DecisionAction::Proceed);
        let second = m
            .process_update("drifting", Some(0.5), drift, None, &tight)
            .unwrap();
        assert_eq!(second.decision.action, DecisionAction::Pause);
        assert_eq!(second.decision.verdict, Verdict::HighRisk);
        let lowered = second.decision.guidance.to_lowercase();
        assert!(!lowered.contains("violation"));
        assert!(!lowered.contains("punish"));
    }

    #[test]
    fn entropy_separates_by_complexity() {
        let mut low = monitor();
        let mut high = monitor();
        let t = thresholds();
        for _ in 0..10 {
            low.process_update("tick", Some(0.1), None, None, &t).unwrap();
            high.process_update("tick", Some(0.9), None, None, &t).unwrap();
        }
        let mean = |m: &Monitor| {
            m.state.history.s.iter().sum::<f64>() / m.state.history.s.len() as f64
        };
        assert!(mean(&high) - mean(&low) >= 0.05);
    }

    #[test]
    fn health_band_tracks_attention() {
        let mut m = monitor();
        let t = thresholds();
        m.process_update("hello", Some(0.05), None, None, &t).unwrap();
        assert_eq!(m.health_status(&t), HealthStatus::Healthy);
    }

    #[test]
    fn sampling_params_step_down_with_severity() {
        let safe = SamplingParams::for_verdict(Verdict::Safe);
        let caution = SamplingParams::for_verdict(Verdict::Caution);
        let high = SamplingParams::for_verdict(Verdict::HighRisk);
        assert!(safe.temperature > caution.temperature);
        assert!(caution.temperature > high.temperature);
    }

    #[test]
    fn metrics_expose_the_deprecated_alias() {
        let mut m = monitor();
        let t = thresholds();
        m.process_update("hello", Some(0.1), None, None, &t).unwrap();
        let metrics = m.metrics(&t);
        assert_eq!(metrics.risk_score, metrics.attention);
        assert_eq!(metrics.update_count, 1);
        assert_eq!(metrics.decision_statistics.proceed, 1);
    }
}
