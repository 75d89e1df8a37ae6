//! Governance Runtime
//!
//! The governance runtime is the core of the govmon server: it accepts
//! periodic updates from autonomous agents, evolves a small per-agent
//! thermodynamic state, classifies each update into an operational
//! recommendation (proceed / revise / pause), persists everything durably,
//! recovers paused agents through the dialectic protocol, and maintains a
//! queryable knowledge graph of cross-agent discoveries.

pub mod config;
pub mod dialectic;
pub mod dynamics;
pub mod knowledge;
pub mod monitor;
pub mod registry;
pub mod store;
pub mod tools;
pub mod types;

// Re-export the common surface.
pub use config::{RuntimeConfig, ThresholdConfig};
pub use dialectic::{DialecticEngine, DialecticSession, SessionState};
pub use knowledge::{Discovery, KnowledgeGraph};
pub use monitor::{Monitor, ThermoState};
pub use registry::MetadataRegistry;
pub use store::{locks::LockManager, FileStore};
pub use tools::{ToolContext, ToolDispatcher};
pub use types::*;

use std::sync::Arc;
use std::time::Duration;

/// Fully wired runtime: storage, registry, knowledge graph, dialectic
/// engine, and the tool dispatcher on top.
pub struct GovernanceRuntime {
    dispatcher: ToolDispatcher,
}

impl GovernanceRuntime {
    /// Initialize every component against the configured data directory.
    /// Stale locks from dead processes are reaped before anything else
    /// runs.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        config
            .validate()
            .map_err(|e| RuntimeError::Internal(e.to_string()))?;

        let store = FileStore::new(config.storage.data_dir.clone())?;
        let locks = LockManager::new(store.locks_dir(), config.locks.clone());
        match locks.cleanup_stale() {
            Ok(0) => {}
            Ok(reaped) => tracing::info!(reaped, "reaped stale locks at startup"),
            Err(e) => tracing::warn!(error = %e, "stale lock sweep failed at startup"),
        }

        let registry = MetadataRegistry::load(
            store.clone(),
            locks.clone(),
            config.persistence.clone(),
            config.rate_limits.clone(),
        )?;
        let graph = KnowledgeGraph::load(store.clone(), locks.clone())?;
        let dialectic = DialecticEngine::load(store.clone(), config.dialectic.clone())?;

        let ctx = Arc::new(ToolContext::new(
            config, store, locks, registry, graph, dialectic,
        ));
        Ok(Self {
            dispatcher: ToolDispatcher::new(ctx),
        })
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    pub fn context(&self) -> &Arc<ToolContext> {
        self.dispatcher.context()
    }

    /// Dispatch one tool call; the result is always a complete envelope.
    pub async fn dispatch(&self, tool: &str, args: serde_json::Value) -> serde_json::Value {
        self.dispatcher.dispatch(tool, args).await
    }

    /// Background task that flushes debounced metadata saves. The handle
    /// should be aborted (or the process exited) after `shutdown`.
    pub fn spawn_flusher(&self) -> tokio::task::JoinHandle<()> {
        let ctx = Arc::clone(self.context());
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(100));
            loop {
                tick.tick().await;
                if let Err(e) = ctx.registry.flush_if_due() {
                    tracing::warn!(error = %e, "debounced metadata flush failed");
                }
            }
        })
    }

    /// Flush anything still pending; call before process exit.
    pub fn shutdown(&self) -> Result<(), RuntimeError> {
        self.context().registry.flush()
    }
}
