//! Knowledge graph of cross-agent discoveries
//!
//! A rate-limited content store with secondary indices and
//! relevance-weighted retrieval. Discoveries reference each other (and
//! dialectic sessions) by id only; references are resolved through the
//! indices at read time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::time;

pub mod graph;
pub mod similarity;

pub use graph::{KnowledgeGraph, SearchFilters, SortBy, SortOrder, StoreOutcome};

/// Discovery classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryType {
    BugFound,
    Insight,
    Pattern,
    Improvement,
    Question,
}

impl DiscoveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryType::BugFound => "bug_found",
            DiscoveryType::Insight => "insight",
            DiscoveryType::Pattern => "pattern",
            DiscoveryType::Improvement => "improvement",
            DiscoveryType::Question => "question",
        }
    }
}

/// Discovery severity; ordered so `Critical` sorts highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// High and critical claims require an authenticated, registered
    /// author.
    pub fn requires_authentication(&self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

/// Discovery lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    Open,
    Resolved,
    Archived,
    Disputed,
}

impl DiscoveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryStatus::Open => "open",
            DiscoveryStatus::Resolved => "resolved",
            DiscoveryStatus::Archived => "archived",
            DiscoveryStatus::Disputed => "disputed",
        }
    }
}

/// One node in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discovery {
    pub id: String,
    pub agent_id: String,
    #[serde(rename = "type")]
    pub kind: DiscoveryType,
    pub summary: String,
    pub details: String,
    pub severity: Severity,
    pub status: DiscoveryStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub related_files: Vec<String>,
    #[serde(default)]
    pub related_discoveries: Vec<String>,
    #[serde(with = "time::iso")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "time::iso_opt", default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
    /// Dialectic session backing a disputed status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute_session_id: Option<String>,
}

/// Fields supplied by the author at store time
#[derive(Debug, Clone, Deserialize)]
pub struct NewDiscovery {
    pub agent_id: String,
    #[serde(rename = "type")]
    pub kind: DiscoveryType,
    pub summary: String,
    pub details: String,
    pub severity: Severity,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub related_files: Vec<String>,
    #[serde(default)]
    pub related_discoveries: Vec<String>,
}
