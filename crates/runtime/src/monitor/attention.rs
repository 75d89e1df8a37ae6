//! Text analysis and the attention score
//!
//! Complexity derivation and the phi/legacy attention blend. Text length
//! and self-reported complexity are the only numerical inputs the monitor
//! trusts; everything else here is a cheap lexical signal. The weights are
//! exposed through `get_thresholds` / `set_thresholds`.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::{AttentionWeights, ThresholdConfig};
use crate::dynamics::clip01;

/// Length at which the length-risk signal saturates
const LENGTH_SATURATION: f64 = 10_000.0;

/// Keyword count at which the keyword signal saturates
const KEYWORD_SATURATION: f64 = 8.0;

/// Lexical markers of technically dense output
const TECH_KEYWORDS: &[&str] = &[
    "error",
    "panic",
    "exception",
    "deadlock",
    "race",
    "overflow",
    "underflow",
    "segfault",
    "corruption",
    "unsafe",
    "mutex",
    "lock",
    "thread",
    "async",
    "concurrency",
    "refactor",
    "regression",
    "rollback",
    "migration",
    "timeout",
    "retry",
    "invariant",
    "recursion",
    "leak",
    "fatal",
];

fn code_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)(```|^\s{4,}\S)").expect("static regex"))
}

/// Lexical signals extracted from one update's response text
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextSignals {
    /// Normalized length share in [0,1]
    pub length_risk: f64,
    /// Fenced or indented code present
    pub has_code_block: bool,
    /// Raw technical-keyword hit count
    pub keyword_hits: usize,
    /// Keyword count rescaled to [0,1]
    pub keyword_signal: f64,
}

/// Scan the response text once for every lexical signal.
pub fn analyze_text(text: &str) -> TextSignals {
    let length_risk = clip01(text.len() as f64 / LENGTH_SATURATION);
    let has_code_block = code_block_regex().is_match(text);

    let lower = text.to_lowercase();
    let keyword_hits = lower
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|word| TECH_KEYWORDS.contains(word))
        .count();

    TextSignals {
        length_risk,
        has_code_block,
        keyword_hits,
        keyword_signal: clip01(keyword_hits as f64 / KEYWORD_SATURATION),
    }
}

/// Derive a complexity estimate from the lexical signals and the recent
/// coherence movement. When the agent self-reports a value, the higher of
/// the two wins; self-reports are clipped first as defense-in-depth.
///
/// Derived blend: 0.35·length + 0.15·code + 0.30·keywords + 0.20·|Δcoherence|.
pub fn derive_complexity(
    signals: &TextSignals,
    coherence_delta: f64,
    self_reported: Option<f64>,
) -> f64 {
    let code = if signals.has_code_block { 1.0 } else { 0.0 };
    let derived = clip01(
        0.35 * signals.length_risk
            + 0.15 * code
            + 0.30 * signals.keyword_signal
            + 0.20 * coherence_delta.abs().min(1.0),
    );
    match self_reported {
        Some(reported) => clip01(reported).max(derived),
        None => derived,
    }
}

/// Attention score and its two constituent blends
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttentionBreakdown {
    pub phi: f64,
    pub legacy: f64,
    pub attention: f64,
}

fn blend(w: &AttentionWeights, signals: &TextSignals, complexity: f64, coherence: f64) -> f64 {
    let coherence_gap = clip01(1.0 - coherence);
    clip01(
        w.length * signals.length_risk
            + w.complexity * complexity
            + w.coherence_gap * coherence_gap
            + w.keywords * signals.keyword_signal,
    )
}

/// Combine phi and the retained legacy heuristic into the attention score.
pub fn attention_score(
    cfg: &ThresholdConfig,
    signals: &TextSignals,
    complexity: f64,
    coherence: f64,
) -> AttentionBreakdown {
    let phi = blend(&cfg.phi_weights, signals, complexity, coherence);
    let legacy = blend(&cfg.legacy_weights, signals, complexity, coherence);
    let share = clip01(cfg.phi_share);
    AttentionBreakdown {
        phi,
        legacy,
        attention: clip01(share * phi + (1.0 - share) * legacy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_plain_text_scores_low() {
        let signals = analyze_text("hello");
        assert!(signals.length_risk < 0.001);
        assert!(!signals.has_code_block);
        assert_eq!(signals.keyword_hits, 0);

        let breakdown =
            attention_score(&ThresholdConfig::default(), &signals, 0.1, 1.0);
        assert!(breakdown.attention < 0.1);
    }

    #[test]
    fn keywords_and_code_raise_the_signals() {
        let text = "Hit a deadlock in the mutex path; async retry caused a panic.\n```rust\nfn x() {}\n```";
        let signals = analyze_text(text);
        assert!(signals.has_code_block);
        assert!(signals.keyword_hits >= 4);
        assert!(signals.keyword_signal > 0.4);
    }

    #[test]
    fn self_report_wins_only_when_higher() {
        let signals = analyze_text("hello");
        let derived = derive_complexity(&signals, 0.0, None);
        assert!(derive_complexity(&signals, 0.0, Some(0.9)) >= 0.9);
        assert_eq!(derive_complexity(&signals, 0.0, Some(0.0)), derived);
        // Out-of-range self-reports are clipped, not trusted.
        assert!(derive_complexity(&signals, 0.0, Some(7.0)) <= 1.0);
    }

    #[test]
    fn attention_is_bounded_and_monotone_in_complexity() {
        let cfg = ThresholdConfig::default();
        let signals = analyze_text("some moderately sized update text");
        let low = attention_score(&cfg, &signals, 0.1, 0.9);
        let high = attention_score(&cfg, &signals, 0.9, 0.9);
        assert!(high.attention > low.attention);
        assert!((0.0..=1.0).contains(&high.attention));
        assert!((0.0..=1.0).contains(&high.phi));
    }
}
