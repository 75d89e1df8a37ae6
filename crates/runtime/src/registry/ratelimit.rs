//! Sliding-window rate limiting over per-agent timestamp rings
//!
//! The counters live inside each agent's metadata record and are mutated
//! under the metadata lock, so the check itself is a pure function over a
//! ring of timestamps.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;

/// Tool categories with independent windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateCategory {
    Updates,
    KnowledgeStores,
}

impl RateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateCategory::Updates => "updates",
            RateCategory::KnowledgeStores => "knowledge_stores",
        }
    }
}

/// Check a rolling window: `Ok(())` when another event is admissible,
/// `Err(reset_at)` when the limit is reached, where `reset_at` is the
/// instant the oldest in-window event ages out.
pub fn check_window(
    timestamps: &VecDeque<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: std::time::Duration,
    limit: usize,
) -> Result<(), DateTime<Utc>> {
    if limit == 0 {
        return Err(now + ChronoDuration::milliseconds(window.as_millis() as i64));
    }
    let window = ChronoDuration::milliseconds(window.as_millis() as i64);
    let in_window: Vec<_> = timestamps
        .iter()
        .filter(|ts| now - **ts < window)
        .collect();
    if in_window.len() < limit {
        return Ok(());
    }
    let oldest = in_window
        .iter()
        .min()
        .copied()
        .copied()
        .unwrap_or(now);
    Err(oldest + window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn admits_below_the_limit() {
        let now = Utc::now();
        let ring: VecDeque<_> = (1..=9)
            .map(|i| now - ChronoDuration::minutes(i))
            .collect();
        assert!(check_window(&ring, now, Duration::from_secs(3600), 10).is_ok());
    }

    #[test]
    fn rejects_at_the_limit_with_reset_hint() {
        let now = Utc::now();
        let ring: VecDeque<_> = (1..=10)
            .map(|i| now - ChronoDuration::minutes(i))
            .collect();
        let reset_at = check_window(&ring, now, Duration::from_secs(3600), 10).unwrap_err();
        // Oldest event is 10 minutes old; the window frees up 50 minutes out.
        let expected = now - ChronoDuration::minutes(10) + ChronoDuration::hours(1);
        assert_eq!(reset_at, expected);
    }

    #[test]
    fn aged_out_events_free_the_window() {
        let now = Utc::now();
        let ring: VecDeque<_> = (0..10)
            .map(|i| now - ChronoDuration::hours(2) - ChronoDuration::minutes(i))
            .collect();
        assert!(check_window(&ring, now, Duration::from_secs(3600), 10).is_ok());
    }
}
