//! Thermodynamic dynamics engine
//!
//! Integrates the four coupled ODEs that drive classification, one Euler
//! step per agent update:
//!
//! ```text
//! dE/dt = α(I − E) − β_E·E·S + γ_E·E·‖Δη‖²
//! dI/dt = −k·S + β_I·I·C(V) − γ_I·I·(1−I)
//! dS/dt = −μ·S + λ₁·‖Δη‖² − λ₂·C(V) + β_c·complexity
//! dV/dt = κ(E − I) − δ·V
//! C(V)  = exp(−V² / (2σ²))
//! ```
//!
//! The integration is pure: no I/O, no global state, deterministic modulo
//! floating precision. The output scalar `C(V)` is the coherence signal the
//! classifier consumes; the dynamics is not a physical simulation.

use crate::config::DynamicsConfig;

pub mod controller;

/// Inputs drawn from the prior state before a step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateVector {
    pub e: f64,
    pub i: f64,
    pub s: f64,
    pub v: f64,
}

/// Result of one Euler step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub state: StateVector,
    pub coherence: f64,
}

/// Clip to the unit interval.
pub fn clip01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Gaussian coherence proxy for E–I balance.
pub fn coherence(v: f64, sigma: f64) -> f64 {
    (-v * v / (2.0 * sigma * sigma)).exp()
}

/// Advance the state by one Euler step of `params.dt`.
///
/// `complexity` is clipped to [0,1] as defense-in-depth; `drift` is the
/// externally observed deviation vector and defaults to zero at the call
/// sites when the agent supplies none. E, I, S are clipped to [0,1] after
/// the step; V is unclipped.
pub fn step(
    params: &DynamicsConfig,
    prior: StateVector,
    lambda1: f64,
    complexity: f64,
    drift: [f64; 3],
) -> StepOutcome {
    let complexity = clip01(complexity);
    let drift_sq = drift.iter().map(|d| d * d).sum::<f64>();
    let c = coherence(prior.v, params.sigma);

    let de = params.alpha * (prior.i - prior.e) - params.beta_e * prior.e * prior.s
        + params.gamma_e * prior.e * drift_sq;
    let di = -params.k * prior.s + params.beta_i * prior.i * c
        - params.gamma_i * prior.i * (1.0 - prior.i);
    let ds = -params.mu * prior.s + lambda1 * drift_sq - params.lambda2 * c
        + params.beta_c * complexity;
    let dv = params.kappa * (prior.e - prior.i) - params.delta * prior.v;

    let state = StateVector {
        e: clip01(prior.e + params.dt * de),
        i: clip01(prior.i + params.dt * di),
        s: clip01(prior.s + params.dt * ds),
        v: prior.v + params.dt * dv,
    };

    StepOutcome {
        coherence: coherence(state.v, params.sigma),
        state,
    }
}
