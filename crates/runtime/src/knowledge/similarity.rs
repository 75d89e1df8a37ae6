//! Tag and keyword similarity scoring
//!
//! Jaccard-style overlap over lowercase token sets. Used for duplicate
//! warnings at store time, `find_similar` queries, and the relevance
//! surfacing inside update responses.

use std::collections::HashSet;

use super::Discovery;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "when", "where", "which",
    "while", "then", "than", "has", "have", "was", "were", "are", "not", "but", "its",
];

/// Lowercase word tokens of length ≥ 3, stopwords removed.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Intersection-over-union of two token sets, in [0,1].
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Score a discovery against a query's summary tokens and tag set:
/// 0.6 · summary overlap + 0.4 · tag overlap.
pub fn score_discovery(
    query_tokens: &HashSet<String>,
    query_tags: &HashSet<String>,
    discovery: &Discovery,
) -> f64 {
    let summary_tokens = tokenize(&discovery.summary);
    let tag_set: HashSet<String> = discovery.tags.iter().map(|t| t.to_lowercase()).collect();
    0.6 * jaccard(query_tokens, &summary_tokens) + 0.4 * jaccard(query_tags, &tag_set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_noise() {
        let tokens = tokenize("The cache WAS invalidated, and the index rebuilt!");
        assert!(tokens.contains("cache"));
        assert!(tokens.contains("invalidated"));
        assert!(!tokens.contains("the"));
        assert!(!tokens.contains("was"));
    }

    #[test]
    fn jaccard_bounds() {
        let a = tokenize("cache invalidation bug in index");
        let b = tokenize("cache invalidation bug in index");
        assert!((jaccard(&a, &b) - 1.0).abs() < 1e-12);

        let c = tokenize("entirely unrelated topic");
        assert!(jaccard(&a, &c) < 0.2);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
    }
}
