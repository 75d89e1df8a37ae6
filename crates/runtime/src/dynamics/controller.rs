//! PI controller for the adaptive lambda1 parameter
//!
//! Every `adjust_every` updates after the warm-up window, lambda1 is nudged
//! toward the value that keeps mean recent coherence at the target. The
//! integral term is NOT reset when the output clips; antiwindup happens by
//! clipping the outcome only.

use crate::config::ControllerConfig;

/// Outcome of a due controller adjustment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    pub lambda1: f64,
    pub pi_integral: f64,
    pub error: f64,
}

/// Returns `Some(adjustment)` when an adjustment is due at this update
/// count, `None` otherwise. Pure; the caller owns lambda1 and the
/// integral accumulator.
pub fn adjust(
    cfg: &ControllerConfig,
    lambda_bounds: (f64, f64),
    lambda1: f64,
    pi_integral: f64,
    coherence_history: &[f64],
    update_count: u64,
) -> Option<Adjustment> {
    if update_count <= cfg.warmup_updates {
        return None;
    }
    if cfg.adjust_every == 0 || update_count % cfg.adjust_every != 0 {
        return None;
    }
    if coherence_history.is_empty() {
        return None;
    }

    let window = coherence_history
        .iter()
        .rev()
        .take(cfg.coherence_window)
        .copied()
        .collect::<Vec<_>>();
    let mean = window.iter().sum::<f64>() / window.len() as f64;

    let error = cfg.target_coherence - mean;
    let integral = pi_integral + error;
    let raw = lambda1 + cfg.kp * error + cfg.ki * integral;
    let (lo, hi) = lambda_bounds;

    Some(Adjustment {
        lambda1: raw.clamp(lo, hi),
        pi_integral: integral,
        error,
    })
}
