//! Shared context handed to every tool handler
//!
//! All process-wide state lives here, initialized once at server startup
//! and passed by reference — no hidden singletons. Monitor access goes
//! through `with_monitor` / `read_monitor`, which hold the agent's file
//! lock and persist the capped state atomically.

use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::{RuntimeConfig, ThresholdConfig};
use crate::dialectic::DialecticEngine;
use crate::knowledge::KnowledgeGraph;
use crate::monitor::Monitor;
use crate::registry::MetadataRegistry;
use crate::store::{locks::LockManager, FileStore};
use crate::types::{time, AgentId, RuntimeError};

/// Per-tool usage counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolUsage {
    pub calls: u64,
    pub errors: u64,
    pub total_duration_ms: u64,
}

/// Process-wide state shared by all handlers
pub struct ToolContext {
    pub config: RuntimeConfig,
    /// Live thresholds; `set_thresholds` and dialectic conditions mutate
    pub thresholds: RwLock<ThresholdConfig>,
    pub store: FileStore,
    pub locks: LockManager,
    pub registry: MetadataRegistry,
    pub graph: KnowledgeGraph,
    pub dialectic: DialecticEngine,
    monitors: DashMap<AgentId, Monitor>,
    pub usage: DashMap<String, ToolUsage>,
    pub started_at: Instant,
    pub started_at_wall: DateTime<Utc>,
}

impl ToolContext {
    pub fn new(
        config: RuntimeConfig,
        store: FileStore,
        locks: LockManager,
        registry: MetadataRegistry,
        graph: KnowledgeGraph,
        dialectic: DialecticEngine,
    ) -> Self {
        Self {
            thresholds: RwLock::new(config.thresholds.clone()),
            config,
            store,
            locks,
            registry,
            graph,
            dialectic,
            monitors: DashMap::new(),
            usage: DashMap::new(),
            started_at: Instant::now(),
            started_at_wall: time::now(),
        }
    }

    /// Snapshot of the live thresholds.
    pub fn thresholds(&self) -> ThresholdConfig {
        self.thresholds.read().clone()
    }

    fn ensure_monitor_loaded(&self, agent_id: &AgentId) -> Result<(), RuntimeError> {
        if self.monitors.contains_key(agent_id) {
            return Ok(());
        }
        let path = self.store.agent_state_path(agent_id.as_str());
        let monitor = match self.store.read_json(&path)? {
            Some(state) => {
                let monitor = Monitor::from_state(
                    state,
                    self.config.dynamics.clone(),
                    self.config.controller.clone(),
                );
                // History is authoritative for the update counter.
                self.registry
                    .reconcile_total_updates(agent_id, monitor.state.update_count);
                monitor
            }
            None => Monitor::new(
                self.config.dynamics.clone(),
                self.config.controller.clone(),
            ),
        };
        self.monitors.entry(agent_id.clone()).or_insert(monitor);
        Ok(())
    }

    /// Run `f` against the agent's monitor under the agent file lock and
    /// persist the capped state afterwards. When `f` fails nothing is
    /// written, so the state file is always pre- or post-update, never
    /// partial.
    pub fn with_monitor<R>(
        &self,
        agent_id: &AgentId,
        f: impl FnOnce(&mut Monitor) -> Result<R, RuntimeError>,
    ) -> Result<R, RuntimeError> {
        let _agent_lock = self.locks.agent(agent_id.as_str())?;
        self.ensure_monitor_loaded(agent_id)?;

        let (result, snapshot) = {
            let mut entry = self.monitors.get_mut(agent_id).ok_or_else(|| {
                RuntimeError::Internal(format!("monitor for {agent_id} vanished"))
            })?;
            let result = f(&mut entry)?;
            let snapshot = entry
                .state
                .for_serialization(self.config.persistence.history_cap);
            (result, snapshot)
        };

        self.store.write_json(
            &self.store.agent_state_path(agent_id.as_str()),
            &snapshot,
        )?;
        Ok(result)
    }

    /// Read-only access to the agent's monitor, loading it on demand.
    pub fn read_monitor<R>(
        &self,
        agent_id: &AgentId,
        f: impl FnOnce(&Monitor) -> R,
    ) -> Result<R, RuntimeError> {
        self.ensure_monitor_loaded(agent_id)?;
        let entry = self.monitors.get(agent_id).ok_or_else(|| {
            RuntimeError::Internal(format!("monitor for {agent_id} vanished"))
        })?;
        Ok(f(&entry))
    }

    /// Whether a state file exists or a monitor is live for this agent.
    pub fn has_monitor_state(&self, agent_id: &AgentId) -> bool {
        self.monitors.contains_key(agent_id)
            || self.store.agent_state_path(agent_id.as_str()).exists()
    }

    /// Drop the in-memory monitor (archival with keep_in_memory=false,
    /// deletion).
    pub fn evict_monitor(&self, agent_id: &AgentId) {
        self.monitors.remove(agent_id);
    }

    /// Coherence and mean attention for reviewer scoring; optimistic
    /// defaults for agents that never produced state.
    pub fn reviewer_metrics(&self, agent_id: &AgentId) -> (f64, f64) {
        if !self.has_monitor_state(agent_id) {
            return (1.0, 0.0);
        }
        let thresholds = self.thresholds();
        self.read_monitor(agent_id, |m| {
            let metrics = m.metrics(&thresholds);
            (metrics.coherence, metrics.mean_risk)
        })
        .unwrap_or((1.0, 0.0))
    }

    pub fn record_usage(&self, tool: &str, elapsed_ms: u64, errored: bool) {
        let mut entry = self.usage.entry(tool.to_string()).or_default();
        entry.calls += 1;
        entry.total_duration_ms += elapsed_ms;
        if errored {
            entry.errors += 1;
        }
    }
}
