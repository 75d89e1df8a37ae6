//! Metadata registry: agent records, API keys, lifecycle, persistence
//!
//! The registry owns every agent metadata record. All mutation happens
//! under the shared metadata file lock; the in-process map is a cache of
//! the single `agent_metadata.json` object. Routine saves are debounced
//! and coalesced; agent creation and lifecycle status changes force an
//! immediate synchronous save so concurrent creations cannot lose
//! records.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::{PersistenceConfig, RateLimitConfig};
use crate::monitor::loop_detector;
use crate::store::{FileStore, locks::LockManager};
use crate::types::{
    time, AgentId, AgentMetadata, AgentStatus, AuthError, DecisionAction, NotFoundError,
    RetryableError, RuntimeError, StateMachineError, ValidationError,
};

pub mod ratelimit;

use ratelimit::{check_window, RateCategory};

/// Outcome of admitting an update for processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// The agent was archived and auto-resumed by this update
    pub auto_resumed: bool,
}

/// How `update_agent_metadata` treats the notes field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotesMode {
    #[default]
    Append,
    Replace,
}

/// Filters for `list_agents`
#[derive(Debug, Clone)]
pub struct ListFilters {
    pub recent_days: Option<i64>,
    pub status: Option<AgentStatus>,
    pub named_only: bool,
    pub limit: usize,
}

impl Default for ListFilters {
    fn default() -> Self {
        Self {
            recent_days: Some(7),
            status: None,
            named_only: false,
            limit: 20,
        }
    }
}

fn generate_api_key() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("gov_{}", hex::encode(bytes))
}

fn salted_hash(api_key: &str) -> String {
    let mut salt_bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = hex::encode(salt_bytes);
    format!("{salt}${}", digest_with_salt(&salt, api_key))
}

fn digest_with_salt(salt: &str, api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

fn hash_matches(stored: &str, presented: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, digest)) => digest_with_salt(salt, presented) == digest,
        None => false,
    }
}

/// In-process registry over the shared metadata file
pub struct MetadataRegistry {
    agents: DashMap<AgentId, AgentMetadata>,
    store: FileStore,
    locks: LockManager,
    persistence: PersistenceConfig,
    rate_limits: RateLimitConfig,
    /// Instant of the first unsaved mutation, when one is pending
    pending_save: Mutex<Option<Instant>>,
    /// Best-effort store windows for ids that never registered
    anonymous_stores: DashMap<String, VecDeque<DateTime<Utc>>>,
}

impl MetadataRegistry {
    /// Load the registry from disk, creating an empty one when the
    /// metadata file does not exist yet.
    pub fn load(
        store: FileStore,
        locks: LockManager,
        persistence: PersistenceConfig,
        rate_limits: RateLimitConfig,
    ) -> Result<Self, RuntimeError> {
        let records: BTreeMap<String, AgentMetadata> = store
            .read_json(&store.metadata_path())?
            .unwrap_or_default();

        let agents = DashMap::new();
        for (id, record) in records {
            agents.insert(AgentId::new(id), record);
        }
        tracing::info!(agents = agents.len(), "metadata registry loaded");

        Ok(Self {
            agents,
            store,
            locks,
            persistence,
            rate_limits,
            pending_save: Mutex::new(None),
            anonymous_stores: DashMap::new(),
        })
    }

    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<AgentMetadata> {
        self.agents.get(agent_id).map(|r| r.clone())
    }

    pub fn require(&self, agent_id: &AgentId) -> Result<AgentMetadata, RuntimeError> {
        self.get(agent_id)
            .ok_or_else(|| NotFoundError::Agent(agent_id.to_string()).into())
    }

    /// Every record, for listing and reviewer selection.
    pub fn snapshot_all(&self) -> Vec<AgentMetadata> {
        self.agents.iter().map(|r| r.clone()).collect()
    }

    // ------------------------------------------------------------------
    // API keys
    // ------------------------------------------------------------------

    /// Register a never-seen agent (no auth) or rotate the key of an
    /// existing one (requires the current key). The raw key is returned
    /// exactly once.
    pub fn issue_api_key(
        &self,
        agent_id: &AgentId,
        force_new: bool,
        presented_key: Option<&str>,
    ) -> Result<(String, bool), RuntimeError> {
        let _meta_lock = self.locks.metadata()?;

        if !self.agents.contains_key(agent_id) {
            let api_key = generate_api_key();
            let record = AgentMetadata::new(agent_id.clone(), salted_hash(&api_key));
            self.agents.insert(agent_id.clone(), record);
            self.save_now_locked()?;
            tracing::info!(agent_id = %agent_id, "registered new agent");
            return Ok((api_key, true));
        }

        if !force_new {
            return Err(ValidationError::Malformed(format!(
                "agent {agent_id} is already registered; pass force_new=true with the current \
                 api_key to rotate"
            ))
            .into());
        }

        let presented = presented_key.ok_or(AuthError::KeyRequired {
            agent_id: agent_id.to_string(),
        })?;
        {
            let record = self.agents.get(agent_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Agent(agent_id.to_string()))
            })?;
            if !hash_matches(&record.api_key_hash, presented) {
                return Err(AuthError::KeyMismatch {
                    agent_id: agent_id.to_string(),
                }
                .into());
            }
        }

        let api_key = generate_api_key();
        if let Some(mut record) = self.agents.get_mut(agent_id) {
            record.api_key_hash = salted_hash(&api_key);
            record
                .lifecycle_events
                .push(crate::types::LifecycleEvent::new("api key rotated", None));
        }
        self.save_now_locked()?;
        Ok((api_key, false))
    }

    /// Check a presented key against the stored salted hash.
    pub fn verify_key(&self, agent_id: &AgentId, api_key: &str) -> Result<(), RuntimeError> {
        let record = self.require(agent_id)?;
        if hash_matches(&record.api_key_hash, api_key) {
            Ok(())
        } else {
            Err(AuthError::KeyMismatch {
                agent_id: agent_id.to_string(),
            }
            .into())
        }
    }

    // ------------------------------------------------------------------
    // Update admission and commitment
    // ------------------------------------------------------------------

    /// Gate an incoming update: status, cooldown, rate window, loop
    /// patterns. Rejections leave no trace in the histories.
    pub fn admit_update(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<Admission, RuntimeError> {
        let _meta_lock = self.locks.metadata()?;

        let (status, cooldown, rate_rejection, loop_hit) = {
            let record = self.agents.get(agent_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Agent(agent_id.to_string()))
            })?;

            let rate = check_window(
                &record.recent_update_timestamps,
                now,
                std::time::Duration::from_secs(3600),
                self.rate_limits.updates_per_hour,
            );
            let loop_hit = loop_detector::detect(
                now,
                &record.recent_update_timestamps,
                &record.recent_decisions,
            );
            (
                record.status,
                record.active_cooldown(now),
                rate.err(),
                loop_hit,
            )
        };

        match status {
            AgentStatus::Deleted => {
                return Err(StateMachineError::InvalidTransition {
                    agent_id: agent_id.to_string(),
                    from: "deleted".to_string(),
                    to: "active".to_string(),
                }
                .into())
            }
            AgentStatus::Paused => {
                return Err(StateMachineError::InvalidTransition {
                    agent_id: agent_id.to_string(),
                    from: "paused".to_string(),
                    to: "active".to_string(),
                }
                .into())
            }
            _ => {}
        }

        if let Some(remaining) = cooldown {
            return Err(RetryableError::LoopCooldown {
                pattern: "cooldown".to_string(),
                remaining_seconds: remaining,
            }
            .into());
        }

        if let Some(reset_at) = rate_rejection {
            return Err(RetryableError::RateLimited {
                category: RateCategory::Updates.as_str().to_string(),
                reset_at,
            }
            .into());
        }

        if let Some(hit) = loop_hit {
            if let Some(mut record) = self.agents.get_mut(agent_id) {
                record.loop_cooldown_until =
                    Some(now + ChronoDuration::milliseconds((hit.cooldown_seconds * 1000.0) as i64));
            }
            self.save_now_locked()?;
            tracing::warn!(
                agent_id = %agent_id,
                pattern = hit.pattern,
                cooldown = hit.cooldown_seconds,
                "loop pattern detected"
            );
            return Err(RetryableError::LoopCooldown {
                pattern: hit.pattern.to_string(),
                remaining_seconds: hit.cooldown_seconds,
            }
            .into());
        }

        let mut auto_resumed = false;
        match status {
            AgentStatus::Archived => {
                if let Some(mut record) = self.agents.get_mut(agent_id) {
                    record.set_status(AgentStatus::Active, "resumed (auto)", None);
                    record.archived_at = None;
                }
                self.save_now_locked()?;
                auto_resumed = true;
            }
            AgentStatus::WaitingInput => {
                if let Some(mut record) = self.agents.get_mut(agent_id) {
                    record.set_status(AgentStatus::Active, "resumed (input received)", None);
                }
                self.save_now_locked()?;
            }
            _ => {}
        }

        Ok(Admission { auto_resumed })
    }

    /// Record the outcome of a processed update. A pause decision is a
    /// status change and forces an immediate save.
    pub fn commit_update(
        &self,
        agent_id: &AgentId,
        action: DecisionAction,
        now: DateTime<Utc>,
        total_updates: u64,
        pause_reason: Option<String>,
    ) -> Result<(), RuntimeError> {
        let _meta_lock = self.locks.metadata()?;

        let paused = {
            let mut record = self.agents.get_mut(agent_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Agent(agent_id.to_string()))
            })?;
            record.push_update_timestamp(now);
            record.push_decision(action);
            record.last_update_at = now;
            // Concurrent commits may arrive out of order; the counter only
            // moves forward. History stays authoritative on divergence.
            record.total_updates = record.total_updates.max(total_updates);
            if action == DecisionAction::Pause {
                record.set_status(
                    AgentStatus::Paused,
                    "paused (circuit breaker)",
                    pause_reason,
                );
                true
            } else {
                false
            }
        };

        if paused {
            self.save_now_locked()?;
        } else {
            self.mark_dirty();
        }
        Ok(())
    }

    /// Force the counter to a known value (monitor reset).
    pub fn set_total_updates(&self, agent_id: &AgentId, value: u64) -> Result<(), RuntimeError> {
        let _meta_lock = self.locks.metadata()?;
        {
            let mut record = self.agents.get_mut(agent_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Agent(agent_id.to_string()))
            })?;
            record.total_updates = value;
        }
        self.mark_dirty();
        Ok(())
    }

    /// History is authoritative when the counters diverge.
    pub fn reconcile_total_updates(&self, agent_id: &AgentId, history_count: u64) {
        if let Some(mut record) = self.agents.get_mut(agent_id) {
            if record.total_updates != history_count {
                tracing::warn!(
                    agent_id = %agent_id,
                    metadata = record.total_updates,
                    history = history_count,
                    "total_updates diverged from history; history wins"
                );
                record.total_updates = history_count;
                drop(record);
                self.mark_dirty();
            }
        }
    }

    // ------------------------------------------------------------------
    // Knowledge-store rate limiting
    // ------------------------------------------------------------------

    /// Admit a knowledge-graph store for this agent and record it.
    /// Unregistered ids are tracked in a process-local window only.
    pub fn admit_knowledge_store(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<(), RuntimeError> {
        let limit = self.rate_limits.knowledge_stores_per_hour;
        let window = std::time::Duration::from_secs(3600);

        if self.agents.contains_key(agent_id) {
            let _meta_lock = self.locks.metadata()?;
            {
                let mut record = self.agents.get_mut(agent_id).ok_or_else(|| {
                    RuntimeError::from(NotFoundError::Agent(agent_id.to_string()))
                })?;
                if let Err(reset_at) =
                    check_window(&record.recent_store_timestamps, now, window, limit)
                {
                    return Err(RetryableError::RateLimited {
                        category: RateCategory::KnowledgeStores.as_str().to_string(),
                        reset_at,
                    }
                    .into());
                }
                record.push_store_timestamp(now);
            }
            self.mark_dirty();
            return Ok(());
        }

        let mut ring = self
            .anonymous_stores
            .entry(agent_id.to_string())
            .or_default();
        if let Err(reset_at) = check_window(&ring, now, window, limit) {
            return Err(RetryableError::RateLimited {
                category: RateCategory::KnowledgeStores.as_str().to_string(),
                reset_at,
            }
            .into());
        }
        ring.push_back(now);
        while ring.len() > crate::types::RECENT_STORES_CAP {
            ring.pop_front();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Pause → active transition on behalf of a dialectic resolution or
    /// tier-1 direct resume.
    pub fn resume_from_pause(
        &self,
        agent_id: &AgentId,
        event: &str,
        reason: Option<String>,
    ) -> Result<(), RuntimeError> {
        let _meta_lock = self.locks.metadata()?;
        {
            let mut record = self.agents.get_mut(agent_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Agent(agent_id.to_string()))
            })?;
            if record.status != AgentStatus::Paused {
                return Err(StateMachineError::NotPaused {
                    agent_id: agent_id.to_string(),
                }
                .into());
            }
            record.set_status(AgentStatus::Active, event, reason);
            // Recovery is a fresh start for the loop detector: the pause
            // decisions that led here must not immediately re-trip it.
            record.recent_decisions.clear();
            record.recent_update_timestamps.clear();
            record.loop_cooldown_until = None;
        }
        self.save_now_locked()
    }

    /// Archive an agent; it will auto-resume on its next update.
    pub fn archive(&self, agent_id: &AgentId, reason: Option<String>) -> Result<(), RuntimeError> {
        let _meta_lock = self.locks.metadata()?;
        {
            let mut record = self.agents.get_mut(agent_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Agent(agent_id.to_string()))
            })?;
            if record.status == AgentStatus::Deleted {
                return Err(StateMachineError::InvalidTransition {
                    agent_id: agent_id.to_string(),
                    from: "deleted".to_string(),
                    to: "archived".to_string(),
                }
                .into());
            }
            record.set_status(AgentStatus::Archived, "archived", reason);
        }
        self.save_now_locked()
    }

    /// Apply an archive decided by a dialectic resolution to a paused
    /// agent.
    pub fn archive_from_pause(
        &self,
        agent_id: &AgentId,
        event: &str,
        reason: Option<String>,
    ) -> Result<(), RuntimeError> {
        let _meta_lock = self.locks.metadata()?;
        {
            let mut record = self.agents.get_mut(agent_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Agent(agent_id.to_string()))
            })?;
            record.set_status(AgentStatus::Archived, event, reason);
        }
        self.save_now_locked()
    }

    /// Tombstone an agent. Pioneer-tagged agents are protected; the
    /// caller must pass `confirm=true`. Returns the backup path when a
    /// backup payload was supplied.
    pub fn delete(
        &self,
        agent_id: &AgentId,
        confirm: bool,
        backup_payload: Option<serde_json::Value>,
    ) -> Result<Option<PathBuf>, RuntimeError> {
        if !confirm {
            return Err(StateMachineError::ConfirmationRequired.into());
        }
        let _meta_lock = self.locks.metadata()?;

        let backup = {
            let record = self.agents.get(agent_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Agent(agent_id.to_string()))
            })?;
            if record.is_pioneer() {
                return Err(StateMachineError::PioneerProtected {
                    agent_id: agent_id.to_string(),
                }
                .into());
            }

            match backup_payload {
                Some(payload) => {
                    let stamp = time::now().format("%Y%m%d%H%M%S").to_string();
                    let path = self.store.backup_path(agent_id.as_str(), &stamp);
                    let bundle = serde_json::json!({
                        "metadata": &*record,
                        "state": payload,
                    });
                    self.store.write_json(&path, &bundle)?;
                    Some(path)
                }
                None => None,
            }
        };

        if let Some(mut record) = self.agents.get_mut(agent_id) {
            record.set_status(AgentStatus::Deleted, "deleted", None);
        }
        self.save_now_locked()?;
        self.store
            .remove(&self.store.agent_state_path(agent_id.as_str()))?;
        Ok(backup)
    }

    /// Mark the agent idle pending external input.
    pub fn mark_response_complete(
        &self,
        agent_id: &AgentId,
        summary: Option<String>,
    ) -> Result<(), RuntimeError> {
        let _meta_lock = self.locks.metadata()?;
        {
            let mut record = self.agents.get_mut(agent_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Agent(agent_id.to_string()))
            })?;
            match record.status {
                AgentStatus::Active | AgentStatus::WaitingInput => {
                    record.set_status(AgentStatus::WaitingInput, "response complete", summary);
                }
                other => {
                    return Err(StateMachineError::InvalidTransition {
                        agent_id: agent_id.to_string(),
                        from: other.as_str().to_string(),
                        to: "waiting_input".to_string(),
                    }
                    .into())
                }
            }
        }
        self.save_now_locked()
    }

    /// Update tags and notes. The pioneer tag, once present, survives
    /// tag replacement.
    pub fn update_fields(
        &self,
        agent_id: &AgentId,
        tags: Option<Vec<String>>,
        notes: Option<String>,
        notes_mode: NotesMode,
    ) -> Result<AgentMetadata, RuntimeError> {
        let _meta_lock = self.locks.metadata()?;
        let updated = {
            let mut record = self.agents.get_mut(agent_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Agent(agent_id.to_string()))
            })?;
            if let Some(mut tags) = tags {
                if record.is_pioneer() && !tags.iter().any(|t| t == crate::types::PIONEER_TAG) {
                    tags.push(crate::types::PIONEER_TAG.to_string());
                }
                record.tags = tags;
            }
            if let Some(notes) = notes {
                match notes_mode {
                    NotesMode::Replace => record.notes = notes,
                    NotesMode::Append => {
                        if !record.notes.is_empty() {
                            record.notes.push('\n');
                        }
                        record.notes.push_str(&notes);
                    }
                }
            }
            record.clone()
        };
        self.mark_dirty();
        Ok(updated)
    }

    /// Attach a tag if not already present.
    pub fn add_tag(&self, agent_id: &AgentId, tag: String) -> Result<(), RuntimeError> {
        let _meta_lock = self.locks.metadata()?;
        {
            let mut record = self.agents.get_mut(agent_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Agent(agent_id.to_string()))
            })?;
            if !record.tags.contains(&tag) {
                record.tags.push(tag);
            }
        }
        self.mark_dirty();
        Ok(())
    }

    /// Append an arbitrary lifecycle event without a status change.
    pub fn append_event(
        &self,
        agent_id: &AgentId,
        event: &str,
        reason: Option<String>,
    ) -> Result<(), RuntimeError> {
        let _meta_lock = self.locks.metadata()?;
        {
            let mut record = self.agents.get_mut(agent_id).ok_or_else(|| {
                RuntimeError::from(NotFoundError::Agent(agent_id.to_string()))
            })?;
            record
                .lifecycle_events
                .push(crate::types::LifecycleEvent::new(event, reason));
        }
        self.mark_dirty();
        Ok(())
    }

    /// Filtered agent listing, newest activity first.
    pub fn list(&self, filters: &ListFilters) -> Vec<AgentMetadata> {
        let now = time::now();
        let mut records: Vec<AgentMetadata> = self
            .agents
            .iter()
            .map(|r| r.clone())
            .filter(|r| r.status != AgentStatus::Deleted)
            .filter(|r| match filters.status {
                Some(status) => r.status == status,
                None => true,
            })
            .filter(|r| match filters.recent_days {
                Some(days) => now - r.last_update_at <= ChronoDuration::days(days),
                None => true,
            })
            .filter(|r| {
                !filters.named_only || !r.tags.is_empty() || !r.notes.is_empty()
            })
            .collect();
        records.sort_by(|a, b| b.last_update_at.cmp(&a.last_update_at));
        records.truncate(filters.limit);
        records
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    fn mark_dirty(&self) {
        let mut pending = self.pending_save.lock();
        if pending.is_none() {
            *pending = Some(Instant::now());
        }
    }

    /// Write the full metadata map immediately. Acquires the metadata
    /// lock; use from code paths that do not already hold it.
    pub fn save_now(&self) -> Result<(), RuntimeError> {
        let _meta_lock = self.locks.metadata()?;
        self.save_now_locked()
    }

    /// Immediate save for callers already holding the metadata lock.
    fn save_now_locked(&self) -> Result<(), RuntimeError> {
        let records: BTreeMap<String, AgentMetadata> = self
            .agents
            .iter()
            .map(|r| (r.key().to_string(), r.clone()))
            .collect();
        self.store
            .write_json(&self.store.metadata_path(), &records)?;
        *self.pending_save.lock() = None;
        Ok(())
    }

    /// Flush when the debounce window has elapsed. Called periodically by
    /// the runtime's background flusher.
    pub fn flush_if_due(&self) -> Result<bool, RuntimeError> {
        let due = {
            let pending = self.pending_save.lock();
            matches!(*pending, Some(since) if since.elapsed() >= self.persistence.metadata_debounce)
        };
        if due {
            self.save_now()?;
        }
        Ok(due)
    }

    /// Unconditional flush of any pending mutation (shutdown path).
    pub fn flush(&self) -> Result<(), RuntimeError> {
        let pending = { self.pending_save.lock().is_some() };
        if pending {
            self.save_now()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;

    fn registry(dir: &std::path::Path) -> MetadataRegistry {
        let store = FileStore::new(dir).unwrap();
        let locks = LockManager::new(store.locks_dir(), LockConfig::default());
        MetadataRegistry::load(
            store,
            locks,
            PersistenceConfig::default(),
            RateLimitConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn registration_returns_the_key_once() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let id = AgentId::from("alpha");

        let (key, is_new) = reg.issue_api_key(&id, false, None).unwrap();
        assert!(is_new);
        assert!(key.starts_with("gov_"));
        reg.verify_key(&id, &key).unwrap();

        // A second plain call must not mint a fresh key silently.
        assert!(reg.issue_api_key(&id, false, None).is_err());

        // Rotation requires the current key and invalidates it.
        let (rotated, is_new) = reg.issue_api_key(&id, true, Some(&key)).unwrap();
        assert!(!is_new);
        assert!(reg.verify_key(&id, &key).is_err());
        reg.verify_key(&id, &rotated).unwrap();
    }

    #[test]
    fn creation_is_persisted_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        reg.issue_api_key(&AgentId::from("alpha"), false, None).unwrap();

        let reloaded = registry(dir.path());
        assert!(reloaded.contains(&AgentId::from("alpha")));
    }

    #[test]
    fn paused_agents_are_not_admitted() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let id = AgentId::from("alpha");
        reg.issue_api_key(&id, false, None).unwrap();
        reg.commit_update(
            &id,
            DecisionAction::Pause,
            time::now(),
            1,
            Some("coherence collapsed".to_string()),
        )
        .unwrap();

        let err = reg.admit_update(&id, time::now()).unwrap_err();
        assert_eq!(err.error_code(), "STATE_VIOLATION");
    }

    #[test]
    fn archived_agents_auto_resume() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let id = AgentId::from("alpha");
        reg.issue_api_key(&id, false, None).unwrap();
        reg.archive(&id, Some("done for the day".to_string())).unwrap();

        let admission = reg.admit_update(&id, time::now()).unwrap();
        assert!(admission.auto_resumed);
        let record = reg.get(&id).unwrap();
        assert_eq!(record.status, AgentStatus::Active);
        assert!(record
            .lifecycle_events
            .iter()
            .any(|e| e.event == "resumed (auto)"));
    }

    #[test]
    fn rapid_fire_sets_cooldown_and_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let id = AgentId::from("gamma");
        reg.issue_api_key(&id, false, None).unwrap();

        let now = time::now();
        reg.admit_update(&id, now).unwrap();
        reg.commit_update(&id, DecisionAction::Proceed, now, 1, None)
            .unwrap();

        let err = reg
            .admit_update(&id, now + ChronoDuration::milliseconds(200))
            .unwrap_err();
        assert_eq!(err.error_code(), "LOOP_COOLDOWN");
        let record = reg.get(&id).unwrap();
        assert!(record.loop_cooldown_until.is_some());
    }

    #[test]
    fn pioneer_agents_cannot_be_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let id = AgentId::from("founder");
        reg.issue_api_key(&id, false, None).unwrap();
        reg.update_fields(
            &id,
            Some(vec![crate::types::PIONEER_TAG.to_string()]),
            None,
            NotesMode::Append,
        )
        .unwrap();

        let err = reg.delete(&id, true, None).unwrap_err();
        assert_eq!(err.error_code(), "PIONEER_PROTECTED");

        // Replacing tags cannot shed the protection either.
        reg.update_fields(&id, Some(vec!["other".to_string()]), None, NotesMode::Append)
            .unwrap();
        assert!(reg.get(&id).unwrap().is_pioneer());
    }

    #[test]
    fn knowledge_store_window_enforces_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let id = AgentId::from("eps");
        reg.issue_api_key(&id, false, None).unwrap();

        let now = time::now();
        for i in 0..10 {
            reg.admit_knowledge_store(&id, now + ChronoDuration::seconds(i))
                .unwrap();
        }
        let err = reg
            .admit_knowledge_store(&id, now + ChronoDuration::seconds(30))
            .unwrap_err();
        assert_eq!(err.error_code(), "RATE_LIMITED");

        // An hour later the window has rolled over.
        reg.admit_knowledge_store(&id, now + ChronoDuration::seconds(3601))
            .unwrap();
    }

    #[test]
    fn deleted_agents_never_process_updates() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let id = AgentId::from("alpha");
        reg.issue_api_key(&id, false, None).unwrap();
        reg.delete(&id, true, None).unwrap();

        let err = reg.admit_update(&id, time::now()).unwrap_err();
        assert_eq!(err.error_code(), "STATE_VIOLATION");
        // Tombstone retained.
        assert_eq!(reg.get(&id).unwrap().status, AgentStatus::Deleted);
    }

    #[test]
    fn debounced_saves_coalesce_and_flush() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let locks = LockManager::new(store.locks_dir(), LockConfig::default());
        let reg = MetadataRegistry::load(
            store,
            locks,
            PersistenceConfig {
                metadata_debounce: std::time::Duration::from_millis(10),
                history_cap: 100,
            },
            RateLimitConfig::default(),
        )
        .unwrap();
        let id = AgentId::from("alpha");
        reg.issue_api_key(&id, false, None).unwrap();

        reg.update_fields(&id, Some(vec!["tagged".to_string()]), None, NotesMode::Append)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(reg.flush_if_due().unwrap());
        assert!(reg.pending_save.lock().is_none());

        let reloaded = registry(dir.path());
        assert!(reloaded
            .get(&id)
            .unwrap()
            .tags
            .contains(&"tagged".to_string()));
    }
}
