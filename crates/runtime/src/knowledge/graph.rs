//! Indexed discovery store over a single JSON snapshot
//!
//! The graph holds one JSON object on disk plus in-memory secondary
//! indices by tag, type, author, and status. Writers serialize through
//! the knowledge file lock (acquired last in the global lock order); the
//! in-process `RwLock` keeps readers cheap.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::store::{locks::LockManager, FileStore};
use crate::types::{time, NotFoundError, RuntimeError, StateMachineError, ValidationError};

use super::similarity::{score_discovery, tokenize};
use super::{Discovery, DiscoveryStatus, DiscoveryType, NewDiscovery, Severity};

/// On-disk shape of the graph
#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphSnapshot {
    discoveries: Vec<Discovery>,
}

#[derive(Default)]
struct GraphIndex {
    by_id: HashMap<String, usize>,
    by_tag: HashMap<String, Vec<usize>>,
    by_type: HashMap<DiscoveryType, Vec<usize>>,
    by_agent: HashMap<String, Vec<usize>>,
    by_status: HashMap<DiscoveryStatus, Vec<usize>>,
}

impl GraphIndex {
    fn rebuild(discoveries: &[Discovery]) -> Self {
        let mut index = Self::default();
        for (pos, d) in discoveries.iter().enumerate() {
            index.by_id.insert(d.id.clone(), pos);
            for tag in &d.tags {
                index
                    .by_tag
                    .entry(tag.to_lowercase())
                    .or_default()
                    .push(pos);
            }
            index.by_type.entry(d.kind).or_default().push(pos);
            index.by_agent.entry(d.agent_id.clone()).or_default().push(pos);
            index.by_status.entry(d.status).or_default().push(pos);
        }
        index
    }
}

struct GraphInner {
    discoveries: Vec<Discovery>,
    index: GraphIndex,
}

/// Search filters for `search_knowledge_graph`
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub agent_id: Option<String>,
    pub kind: Option<DiscoveryType>,
    /// All listed tags must be present
    pub tags: Vec<String>,
    pub severity: Option<Severity>,
    pub status: Option<DiscoveryStatus>,
    pub text: Option<String>,
    pub limit: usize,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    Timestamp,
    Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Result of a store operation
#[derive(Debug, Clone, Serialize)]
pub struct StoreOutcome {
    pub id: String,
    /// Similar existing discoveries, reported but never blocking
    pub duplicate_warnings: Vec<ScoredDiscovery>,
}

/// A discovery with its similarity or relevance score
#[derive(Debug, Clone, Serialize)]
pub struct ScoredDiscovery {
    pub discovery: Discovery,
    pub score: f64,
}

/// Thread-safe knowledge graph handle
pub struct KnowledgeGraph {
    inner: RwLock<GraphInner>,
    store: FileStore,
    locks: LockManager,
}

impl KnowledgeGraph {
    /// Load the graph snapshot from disk, or start empty.
    pub fn load(store: FileStore, locks: LockManager) -> Result<Self, RuntimeError> {
        let snapshot: GraphSnapshot = store
            .read_json(&store.knowledge_path())?
            .unwrap_or_default();
        tracing::info!(
            discoveries = snapshot.discoveries.len(),
            "knowledge graph loaded"
        );
        let index = GraphIndex::rebuild(&snapshot.discoveries);
        Ok(Self {
            inner: RwLock::new(GraphInner {
                discoveries: snapshot.discoveries,
                index,
            }),
            store,
            locks,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.read().discoveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, inner: &GraphInner) -> Result<(), RuntimeError> {
        let _kg_lock = self.locks.knowledge()?;
        let snapshot = GraphSnapshot {
            discoveries: inner.discoveries.clone(),
        };
        self.store
            .write_json(&self.store.knowledge_path(), &snapshot)?;
        Ok(())
    }

    fn mint_id(inner: &GraphInner, now: DateTime<Utc>) -> String {
        let base = format!("d{}", now.format("%Y%m%d%H%M%S%6f"));
        if !inner.index.by_id.contains_key(&base) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}-{n}");
            if !inner.index.by_id.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Append a discovery. Rate limiting and severity gating happen at
    /// the handler layer; duplicate warnings are advisory only.
    pub fn store_discovery(
        &self,
        new: NewDiscovery,
        check_duplicates: bool,
    ) -> Result<StoreOutcome, RuntimeError> {
        if new.summary.trim().is_empty() {
            return Err(ValidationError::MissingField("summary".to_string()).into());
        }

        let mut inner = self.inner.write();
        let duplicate_warnings = if check_duplicates {
            find_similar_inner(&inner, &new.summary, &new.tags, 0.35, 3)
        } else {
            Vec::new()
        };

        let now = time::now();
        let id = Self::mint_id(&inner, now);
        let discovery = Discovery {
            id: id.clone(),
            agent_id: new.agent_id,
            kind: new.kind,
            summary: new.summary,
            details: new.details,
            severity: new.severity,
            status: DiscoveryStatus::Open,
            tags: new.tags,
            related_files: new.related_files,
            related_discoveries: new.related_discoveries,
            created_at: now,
            resolved_at: None,
            resolution_note: None,
            dispute_session_id: None,
        };
        inner.discoveries.push(discovery);
        let rebuilt = GraphIndex::rebuild(&inner.discoveries);
        inner.index = rebuilt;
        self.persist(&inner)?;

        tracing::debug!(id = %id, "stored discovery");
        Ok(StoreOutcome {
            id,
            duplicate_warnings,
        })
    }

    pub fn get(&self, id: &str) -> Result<Discovery, RuntimeError> {
        let inner = self.inner.read();
        inner
            .index
            .by_id
            .get(id)
            .map(|pos| inner.discoveries[*pos].clone())
            .ok_or_else(|| NotFoundError::Discovery(id.to_string()).into())
    }

    /// Filtered search over the indices.
    pub fn search(&self, filters: &SearchFilters) -> Vec<Discovery> {
        let inner = self.inner.read();

        // Start from the narrowest available index.
        let candidates: Vec<usize> = if let Some(agent) = &filters.agent_id {
            inner
                .index
                .by_agent
                .get(agent)
                .cloned()
                .unwrap_or_default()
        } else if let Some(first_tag) = filters.tags.first() {
            inner
                .index
                .by_tag
                .get(&first_tag.to_lowercase())
                .cloned()
                .unwrap_or_default()
        } else if let Some(kind) = filters.kind {
            inner.index.by_type.get(&kind).cloned().unwrap_or_default()
        } else {
            (0..inner.discoveries.len()).collect()
        };

        let needle = filters.text.as_ref().map(|t| t.to_lowercase());
        let mut matches: Vec<&Discovery> = candidates
            .into_iter()
            .map(|pos| &inner.discoveries[pos])
            .filter(|d| {
                filters
                    .agent_id
                    .as_ref()
                    .is_none_or(|agent| &d.agent_id == agent)
            })
            .filter(|d| filters.kind.is_none_or(|k| d.kind == k))
            .filter(|d| filters.severity.is_none_or(|s| d.severity == s))
            .filter(|d| filters.status.is_none_or(|s| d.status == s))
            .filter(|d| {
                filters.tags.iter().all(|tag| {
                    let tag = tag.to_lowercase();
                    d.tags.iter().any(|t| t.to_lowercase() == tag)
                })
            })
            .filter(|d| {
                needle.as_ref().is_none_or(|needle| {
                    d.summary.to_lowercase().contains(needle)
                        || d.details.to_lowercase().contains(needle)
                })
            })
            .collect();

        match filters.sort_by {
            SortBy::Timestamp => matches.sort_by_key(|d| d.created_at),
            SortBy::Severity => matches.sort_by_key(|d| (d.severity, d.created_at)),
        }
        if filters.sort_order == SortOrder::Desc {
            matches.reverse();
        }

        let limit = if filters.limit == 0 { 100 } else { filters.limit };
        matches.into_iter().take(limit).cloned().collect()
    }

    /// Similar discoveries with score ≥ threshold.
    pub fn find_similar(
        &self,
        summary: &str,
        tags: &[String],
        threshold: f64,
        limit: usize,
    ) -> Vec<ScoredDiscovery> {
        let inner = self.inner.read();
        find_similar_inner(&inner, summary, tags, threshold, limit)
    }

    /// Enforced status transitions. Idempotent for an equal status.
    /// `disputed` requires the linking dialectic session id; archived
    /// discoveries cannot be disputed.
    pub fn update_status(
        &self,
        id: &str,
        status: DiscoveryStatus,
        resolution_note: Option<String>,
        session_id: Option<String>,
    ) -> Result<Discovery, RuntimeError> {
        let mut inner = self.inner.write();
        let pos = *inner
            .index
            .by_id
            .get(id)
            .ok_or_else(|| RuntimeError::from(NotFoundError::Discovery(id.to_string())))?;

        {
            let current = &inner.discoveries[pos];
            if current.status == status
                && resolution_note.is_none()
                && session_id.is_none()
            {
                return Ok(current.clone());
            }
            if status == DiscoveryStatus::Disputed {
                if current.status == DiscoveryStatus::Archived {
                    return Err(StateMachineError::InvalidTransition {
                        agent_id: current.agent_id.clone(),
                        from: "archived".to_string(),
                        to: "disputed".to_string(),
                    }
                    .into());
                }
                if session_id.is_none() {
                    return Err(ValidationError::MissingField(
                        "session_id (disputes must reference a dialectic session)".to_string(),
                    )
                    .into());
                }
            }
        }

        {
            let discovery = &mut inner.discoveries[pos];
            discovery.status = status;
            match status {
                DiscoveryStatus::Resolved => {
                    discovery.resolved_at = Some(time::now());
                    if resolution_note.is_some() {
                        discovery.resolution_note = resolution_note;
                    }
                }
                DiscoveryStatus::Disputed => {
                    discovery.dispute_session_id = session_id;
                }
                _ => {
                    if resolution_note.is_some() {
                        discovery.resolution_note = resolution_note;
                    }
                }
            }
        }
        let rebuilt = GraphIndex::rebuild(&inner.discoveries);
        inner.index = rebuilt;
        self.persist(&inner)?;
        Ok(inner.discoveries[pos].clone())
    }

    /// Top discoveries from *other* agents relevant to the caller's
    /// recent context. O(candidates) over the tag index; bounded output.
    pub fn surface_relevant(
        &self,
        agent_id: &str,
        recent_tags: &[String],
        text: &str,
        limit: usize,
    ) -> Vec<ScoredDiscovery> {
        let inner = self.inner.read();
        let query_tokens = tokenize(text);
        let query_tags: HashSet<String> = recent_tags
            .iter()
            .map(|t| t.to_lowercase())
            .collect();

        // Candidates: tag-index hits for the caller's tags, plus tag
        // names that appear verbatim in the text.
        let mut candidates: HashSet<usize> = HashSet::new();
        for tag in &query_tags {
            if let Some(hits) = inner.index.by_tag.get(tag) {
                candidates.extend(hits.iter().copied());
            }
        }
        for (tag, hits) in &inner.index.by_tag {
            if query_tokens.contains(tag) {
                candidates.extend(hits.iter().copied());
            }
        }

        let mut scored: Vec<ScoredDiscovery> = candidates
            .into_iter()
            .map(|pos| &inner.discoveries[pos])
            .filter(|d| d.agent_id != agent_id)
            .filter(|d| {
                matches!(
                    d.status,
                    DiscoveryStatus::Open | DiscoveryStatus::Resolved
                )
            })
            .map(|d| ScoredDiscovery {
                score: score_discovery(&query_tokens, &query_tags, d),
                discovery: d.clone(),
            })
            .filter(|s| s.score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        scored
    }
}

fn find_similar_inner(
    inner: &GraphInner,
    summary: &str,
    tags: &[String],
    threshold: f64,
    limit: usize,
) -> Vec<ScoredDiscovery> {
    let query_tokens = tokenize(summary);
    let query_tags: HashSet<String> = tags.iter().map(|t| t.to_lowercase()).collect();

    let mut scored: Vec<ScoredDiscovery> = inner
        .discoveries
        .iter()
        .map(|d| ScoredDiscovery {
            score: score_discovery(&query_tokens, &query_tags, d),
            discovery: d.clone(),
        })
        .filter(|s| s.score >= threshold)
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(limit);
    scored
}
